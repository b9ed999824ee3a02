//! CLI command implementations

use crate::output::format_bytes;
use crate::settings;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Context, Result};
use console::style;
use dlstate_core::{DownloadDatabase, DownloadStore};
use dlstate_types::{DelegateSettings, Download, DownloadStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const DATABASE_FILE: &str = "downloads.db";

/// Opened data directory: settings plus the download store
pub struct App {
    pub data_dir: PathBuf,
    pub settings: DelegateSettings,
    pub db: Arc<DownloadDatabase>,
}

impl App {
    pub async fn open(data_dir: PathBuf, retry_override: Option<bool>) -> Result<Self> {
        let mut settings = settings::load(&data_dir).await?;
        if let Some(retry) = retry_override {
            settings.retry_on_network_gain = retry;
        }

        let db_path = data_dir.join(DATABASE_FILE);
        let db = DownloadDatabase::new(&db_path)
            .await
            .with_context(|| format!("opening {}", db_path.display()))?;

        tracing::debug!(data_dir = %data_dir.display(), "Opened data directory");

        Ok(Self {
            data_dir,
            settings,
            db: Arc::new(db),
        })
    }
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn list_downloads(
    app: &App,
    status_filter: Option<String>,
    show_all: bool,
    format: OutputFormat,
) -> Result<()> {
    let status_filter = match status_filter {
        Some(s) => Some(
            DownloadStatus::parse(&s.to_lowercase())
                .ok_or_else(|| anyhow!("Unknown status: {}", s))?,
        ),
        None => None,
    };

    let mut downloads = app.db.load_all_downloads().await?;
    downloads.retain(|d| status_filter.map_or(true, |s| d.status() == s));
    downloads.sort_by_key(|d| d.created_at);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&downloads)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct DownloadRow {
                id: String,
                file: String,
                size: String,
                progress: String,
                status: String,
                error: String,
            }

            let rows: Vec<DownloadRow> = downloads
                .iter()
                .map(|d| DownloadRow {
                    id: d.id.to_string()[..8].to_string(),
                    file: truncate(&d.file_name(), 30),
                    size: d
                        .total
                        .map(format_bytes)
                        .unwrap_or_else(|| "?".to_string()),
                    progress: format!("{:.1}%", d.progress()),
                    status: d.status().to_string(),
                    error: d.error().to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if downloads.is_empty() {
                println!("{}", style("No downloads found").dim());
                return Ok(());
            }

            for download in &downloads {
                print_download_summary(download, show_all);
            }
            println!();
            println!("{} download(s) total", style(downloads.len()).bold());
        }
    }

    Ok(())
}

fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() > max {
        let head: String = name.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

fn print_download_summary(download: &Download, detailed: bool) {
    let status_icon = match download.status() {
        DownloadStatus::Completed => style("✓").green(),
        DownloadStatus::Downloading => style("↓").cyan(),
        DownloadStatus::Queued => style("⏸").yellow(),
        DownloadStatus::Failed => style("✗").red(),
    };

    let progress = format!("{:.1}%", download.progress());

    println!(
        "{} {} {} [{}]",
        status_icon,
        style(download.file_name()).bold(),
        style(&progress).dim(),
        style(download.status()).dim()
    );

    if detailed {
        println!("    ID: {}", download.id);
        println!("    URL: {}", download.url);
        println!("    File: {}", download.file.display());
        match download.total {
            Some(total) => println!(
                "    Size: {} / {}",
                format_bytes(download.downloaded),
                format_bytes(total)
            ),
            None => println!("    Downloaded: {}", format_bytes(download.downloaded)),
        }
        if !download.options.is_empty() {
            println!("    Options: {}", settings::format_options(&download.options));
        }
        if !download.error().is_none() {
            println!("    Error: {}", style(download.error()).red());
        }
        println!();
    }
}

pub async fn show_info(app: &App, id: &str, format: OutputFormat) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    let download = app
        .db
        .load_download(uuid)
        .await?
        .ok_or_else(|| anyhow!("Download not found: {}", uuid))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&download)?);
        }
        _ => {
            print_download_summary(&download, true);
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    data_dir: &Path,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = settings::load(data_dir).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                _ => {
                    println!("dlstate Configuration:");
                    println!();
                    println!("  Data directory: {}", data_dir.display());
                    println!(
                        "  Retry on network gain: {}",
                        settings.retry_on_network_gain
                    );
                    println!("  Temp directory: {}", settings.temp_dir.display());
                    println!(
                        "  Request options: {}",
                        settings::format_options(&settings.request_options)
                    );
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = settings::load(data_dir).await?;
            println!("{}", settings::get_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = settings::load(data_dir).await?;
            settings::set_value(&mut settings, &key, &value)?;
            settings::save(data_dir, &settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset) => {
            settings::save(data_dir, &DelegateSettings::for_data_dir(data_dir)).await?;
            println!("{} Config reset to defaults", style("✓").green().bold());
        }
    }

    Ok(())
}
