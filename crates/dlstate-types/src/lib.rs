//! Shared types for dlstate
//!
//! This crate contains the data structures passed between the download
//! engine, the lifecycle delegate, the persistence layer and listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ============================================================================
// Download Types
// ============================================================================

/// Represents a single tracked download
///
/// `status` and `error` are only changed through the `mark_*` methods so the
/// two stay consistent: an error other than [`DownloadError::None`] is only
/// carried while the download is [`DownloadStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DownloadParts")]
pub struct Download {
    pub id: Uuid,
    pub url: String,
    /// Target path of the downloaded file
    pub file: PathBuf,
    status: DownloadStatus,
    error: DownloadError,
    pub downloaded: u64,
    pub total: Option<u64>,
    /// Post-terminal cleanup flags, fixed at creation time
    #[serde(default)]
    pub options: RequestOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire shape of a [`Download`]; deserialization goes through [`Download::restore`]
#[derive(Deserialize)]
struct DownloadParts {
    id: Uuid,
    url: String,
    file: PathBuf,
    status: DownloadStatus,
    #[serde(default)]
    error: DownloadError,
    downloaded: u64,
    total: Option<u64>,
    #[serde(default)]
    options: RequestOptions,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DownloadParts> for Download {
    fn from(parts: DownloadParts) -> Self {
        Download::restore(
            parts.id,
            parts.url,
            parts.file,
            parts.status,
            parts.error,
            parts.downloaded,
            parts.total,
            parts.options,
            parts.created_at,
            parts.updated_at,
        )
    }
}

impl Download {
    pub fn new(url: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            file: file.into(),
            status: DownloadStatus::Queued,
            error: DownloadError::None,
            downloaded: 0,
            total: None,
            options: RequestOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach request options to a freshly created download
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Rebuild a download from stored parts
    ///
    /// Used by persistence adapters. A stored error on a non-failed record is
    /// dropped rather than trusted.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        url: String,
        file: PathBuf,
        status: DownloadStatus,
        error: DownloadError,
        downloaded: u64,
        total: Option<u64>,
        options: RequestOptions,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let error = if status == DownloadStatus::Failed {
            error
        } else {
            DownloadError::None
        };
        Self {
            id,
            url,
            file,
            status,
            error,
            downloaded,
            total,
            options,
            created_at,
            updated_at,
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn error(&self) -> DownloadError {
        self.error
    }

    pub fn mark_queued(&mut self) {
        self.transition(DownloadStatus::Queued, DownloadError::None);
    }

    pub fn mark_downloading(&mut self) {
        self.transition(DownloadStatus::Downloading, DownloadError::None);
    }

    pub fn mark_completed(&mut self) {
        self.transition(DownloadStatus::Completed, DownloadError::None);
    }

    /// Move to `Failed`, keeping whatever error the engine reported
    pub fn mark_failed(&mut self) {
        let error = self.error;
        self.transition(DownloadStatus::Failed, error);
    }

    /// Record an engine failure classification together with `Failed`
    pub fn fail_with(&mut self, error: DownloadError) {
        self.transition(DownloadStatus::Failed, error);
    }

    fn transition(&mut self, status: DownloadStatus, error: DownloadError) {
        self.status = status;
        self.error = error;
        self.updated_at = Utc::now();
    }

    pub fn progress(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.downloaded as f64 / total as f64) * 100.0,
            _ => 0.0,
        }
    }

    /// File name component of the target path
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string())
    }

    /// Path of the metadata sidecar kept next to the target file
    pub fn meta_path(&self) -> PathBuf {
        let mut name = self.file.clone().into_os_string();
        name.push(".dlstate.meta");
        PathBuf::from(name)
    }
}

/// Lifecycle stage of a download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DownloadStatus::Queued),
            "downloading" => Some(DownloadStatus::Downloading),
            "completed" => Some(DownloadStatus::Completed),
            "failed" => Some(DownloadStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal-failure classification reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadError {
    #[default]
    None,
    Unknown,
    NoNetworkConnection,
    ConnectionTimedOut,
    HttpNotFound,
    EmptyResponseFromServer,
    RequestNotSuccessful,
    NoStorageSpace,
    FileNotCreated,
    WriteError,
}

impl DownloadError {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadError::None => "none",
            DownloadError::Unknown => "unknown",
            DownloadError::NoNetworkConnection => "no_network_connection",
            DownloadError::ConnectionTimedOut => "connection_timed_out",
            DownloadError::HttpNotFound => "http_not_found",
            DownloadError::EmptyResponseFromServer => "empty_response_from_server",
            DownloadError::RequestNotSuccessful => "request_not_successful",
            DownloadError::NoStorageSpace => "no_storage_space",
            DownloadError::FileNotCreated => "file_not_created",
            DownloadError::WriteError => "write_error",
        }
    }

    /// Parse a stored error code; unrecognized codes map to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "none" | "" => DownloadError::None,
            "no_network_connection" => DownloadError::NoNetworkConnection,
            "connection_timed_out" => DownloadError::ConnectionTimedOut,
            "http_not_found" => DownloadError::HttpNotFound,
            "empty_response_from_server" => DownloadError::EmptyResponseFromServer,
            "request_not_successful" => DownloadError::RequestNotSuccessful,
            "no_storage_space" => DownloadError::NoStorageSpace,
            "file_not_created" => DownloadError::FileNotCreated,
            "write_error" => DownloadError::WriteError,
            _ => DownloadError::Unknown,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == DownloadError::None
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request Options
// ============================================================================

/// Post-terminal cleanup flag attached to a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestOption {
    RemoveOnFailed,
    RemoveOnFailedDeleteFile,
    RemoveOnCompleted,
    RemoveOnCompletedDeleteFile,
}

/// Immutable set of enabled request options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestOptions(BTreeSet<RequestOption>);

impl RequestOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, option: RequestOption) -> bool {
        self.0.contains(&option)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RequestOption> + '_ {
        self.0.iter().copied()
    }

    /// Options enabled in either set
    pub fn union(&self, other: &RequestOptions) -> RequestOptions {
        Self(self.0.union(&other.0).copied().collect())
    }
}

impl FromIterator<RequestOption> for RequestOptions {
    fn from_iter<I: IntoIterator<Item = RequestOption>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[RequestOption; N]> for RequestOptions {
    fn from(options: [RequestOption; N]) -> Self {
        options.into_iter().collect()
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Configuration consumed by the lifecycle delegate at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateSettings {
    /// Requeue downloads that failed for lack of network instead of failing them
    #[serde(default = "default_retry_on_network_gain")]
    pub retry_on_network_gain: bool,
    /// Root directory holding per-download temporary files
    pub temp_dir: PathBuf,
    /// Cleanup flags applied to every download, on top of its own options
    #[serde(default)]
    pub request_options: RequestOptions,
}

fn default_retry_on_network_gain() -> bool {
    true
}

impl DelegateSettings {
    /// Default settings rooted at a data directory
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            temp_dir: data_dir.join("temp"),
            ..Self::default()
        }
    }
}

impl Default for DelegateSettings {
    fn default() -> Self {
        Self {
            retry_on_network_gain: true,
            temp_dir: dirs::data_dir()
                .map(|p| p.join("dlstate").join("temp"))
                .unwrap_or_else(|| PathBuf::from(".dlstate/temp")),
            request_options: RequestOptions::default(),
        }
    }
}

// ============================================================================
// Notification Types
// ============================================================================

/// Listener callbacks rendered as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadNotification {
    Queued {
        download: Download,
    },
    Progress {
        download: Download,
        eta_ms: i64,
        bytes_per_second: i64,
    },
    Error {
        download: Download,
    },
    Completed {
        download: Download,
    },
}

impl DownloadNotification {
    pub fn download(&self) -> &Download {
        match self {
            DownloadNotification::Queued { download }
            | DownloadNotification::Progress { download, .. }
            | DownloadNotification::Error { download }
            | DownloadNotification::Completed { download } => download,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DownloadNotification::Queued { .. } => "queued",
            DownloadNotification::Progress { .. } => "progress",
            DownloadNotification::Error { .. } => "error",
            DownloadNotification::Completed { .. } => "completed",
        }
    }
}
