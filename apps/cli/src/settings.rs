//! Delegate settings stored as JSON in the data directory

use anyhow::{anyhow, Context, Result};
use dlstate_types::{DelegateSettings, RequestOption, RequestOptions};
use std::path::{Path, PathBuf};
use tokio::fs;

const SETTINGS_FILE: &str = "settings.json";

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

/// Load settings, falling back to defaults rooted at `data_dir`
pub async fn load(data_dir: &Path) -> Result<DelegateSettings> {
    let path = settings_path(data_dir);
    if !fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(DelegateSettings::for_data_dir(data_dir));
    }

    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub async fn save(data_dir: &Path, settings: &DelegateSettings) -> Result<()> {
    fs::create_dir_all(data_dir).await?;
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(data_dir), content).await?;
    Ok(())
}

pub fn get_value(settings: &DelegateSettings, key: &str) -> Result<String> {
    let value = match key {
        "retry_on_network_gain" => settings.retry_on_network_gain.to_string(),
        "temp_dir" => settings.temp_dir.display().to_string(),
        "request_options" => format_options(&settings.request_options),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    };
    Ok(value)
}

pub fn set_value(settings: &mut DelegateSettings, key: &str, value: &str) -> Result<()> {
    match key {
        "retry_on_network_gain" => settings.retry_on_network_gain = value.parse()?,
        "temp_dir" => settings.temp_dir = PathBuf::from(value),
        "request_options" => settings.request_options = parse_options(value)?,
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    }
    Ok(())
}

/// Parse a comma-separated list such as `remove-on-failed,remove-on-completed`
pub fn parse_options(value: &str) -> Result<RequestOptions> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            serde_json::from_value::<RequestOption>(serde_json::Value::String(s.to_string()))
                .map_err(|_| anyhow!("Unknown request option: {}", s))
        })
        .collect()
}

pub fn format_options(options: &RequestOptions) -> String {
    if options.is_empty() {
        return "none".to_string();
    }
    options
        .iter()
        .filter_map(|o| serde_json::to_value(o).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect::<Vec<_>>()
        .join(",")
}
