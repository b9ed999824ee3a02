//! Scripted engine event streams
//!
//! A replay script stands in for the download engine: it declares a few
//! downloads and a sequence of engine events, which are fed one by one
//! through a [`LifecycleDelegate`] backed by the data directory's store.

use crate::commands::App;
use crate::output::format_bytes;
use crate::progress::ReplayProgress;
use crate::OutputFormat;
use anyhow::{anyhow, Context, Result};
use console::style;
use dlstate_core::{ChannelListener, EngineEvent, LifecycleDelegate, LocalFileSystem};
use dlstate_types::{Download, DownloadError, DownloadNotification, RequestOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub downloads: Vec<ScriptDownload>,
    pub steps: Vec<ScriptStep>,
}

/// A download declared under an alias
#[derive(Debug, Deserialize)]
pub struct ScriptDownload {
    pub name: String,
    pub url: String,
    pub file: PathBuf,
    #[serde(default)]
    pub options: RequestOptions,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Started,
    Progress,
    Error,
    Complete,
    Checkpoint,
}

/// One engine event; the optional fields are applied to the record first
#[derive(Debug, Deserialize)]
pub struct ScriptStep {
    pub download: String,
    pub event: StepKind,
    #[serde(default)]
    pub downloaded: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default = "unknown_rate")]
    pub eta_ms: i64,
    #[serde(default = "unknown_rate")]
    pub bytes_per_second: i64,
    #[serde(default)]
    pub error: Option<DownloadError>,
}

fn unknown_rate() -> i64 {
    -1
}

impl Script {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let script: Script = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        script.validate()?;
        Ok(script)
    }

    /// Every step must name a declared download
    fn validate(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if !self.downloads.iter().any(|d| d.name == step.download) {
                return Err(anyhow!(
                    "step {} refers to undeclared download '{}'",
                    index + 1,
                    step.download
                ));
            }
        }
        Ok(())
    }

    fn records(&self) -> HashMap<String, Download> {
        self.downloads
            .iter()
            .map(|d| {
                let mut download = Download::new(&d.url, &d.file).with_options(d.options.clone());
                download.total = d.total;
                (d.name.clone(), download)
            })
            .collect()
    }
}

impl ScriptStep {
    /// Apply the step's field updates and build the matching engine event
    fn apply<'a>(&self, download: &'a mut Download) -> EngineEvent<'a> {
        if let Some(downloaded) = self.downloaded {
            download.downloaded = downloaded;
        }
        if self.total.is_some() {
            download.total = self.total;
        }

        match self.event {
            StepKind::Started => EngineEvent::Started {
                download,
                eta_ms: self.eta_ms,
                bytes_per_second: self.bytes_per_second,
            },
            StepKind::Progress => EngineEvent::Progress {
                download,
                eta_ms: self.eta_ms,
                bytes_per_second: self.bytes_per_second,
            },
            StepKind::Error => {
                download.fail_with(self.error.unwrap_or(DownloadError::Unknown));
                EngineEvent::Error { download }
            }
            StepKind::Complete => EngineEvent::Completed { download },
            StepKind::Checkpoint => EngineEvent::Checkpoint { download },
        }
    }
}

pub async fn run(app: &App, script_path: &Path, format: OutputFormat) -> Result<()> {
    let script = Script::load(script_path).await?;
    let mut records = script.records();

    let (listener, rx) = ChannelListener::new();
    let printer = tokio::spawn(print_notifications(rx, format));

    let delegate = LifecycleDelegate::new(
        &app.settings,
        app.db.clone(),
        Arc::new(LocalFileSystem),
        Arc::new(listener),
    );

    tracing::info!(
        script = %script_path.display(),
        data_dir = %app.data_dir.display(),
        steps = script.steps.len(),
        "Replaying engine events"
    );

    for step in &script.steps {
        let download = records
            .get_mut(&step.download)
            .ok_or_else(|| anyhow!("Unknown download alias: {}", step.download))?;
        tracing::debug!(alias = %step.download, event = ?step.event, "Replay step");
        delegate.on_event(step.apply(download)).await;
    }

    delegate.dispatcher().flush().await?;
    delegate.dispatcher().shutdown().await;
    drop(delegate);

    let delivered = printer.await?;
    app.db.close().await;

    if matches!(format, OutputFormat::Human | OutputFormat::Table) {
        println!(
            "{} Replayed {} step(s), {} notification(s) delivered",
            style("✓").green().bold(),
            script.steps.len(),
            delivered
        );
    }

    Ok(())
}

async fn print_notifications(
    mut rx: mpsc::UnboundedReceiver<DownloadNotification>,
    format: OutputFormat,
) -> usize {
    let mut delivered = 0;
    let mut bars = ReplayProgress::new();

    while let Some(notification) = rx.recv().await {
        delivered += 1;
        match format {
            OutputFormat::Json => match serde_json::to_string(&notification) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to serialize notification: {}", e),
            },
            OutputFormat::Table => {
                let download = notification.download();
                println!(
                    "{:<10} {:<30} {:>12} {}",
                    notification.kind(),
                    download.file_name(),
                    format_bytes(download.downloaded),
                    download.status()
                );
            }
            OutputFormat::Human => bars.handle(&notification),
        }
    }

    bars.clear();
    delivered
}
