//! Status persistence port and its adapters
//!
//! The lifecycle delegate only talks to [`DownloadStore`]. Two adapters ship
//! with the crate:
//! - [`DownloadDatabase`]: SQLite, one row per download
//! - [`MemoryStore`]: in-process map, used by tests and dry runs

mod memory;
mod persistence;

pub use memory::*;
pub use persistence::*;

use crate::error::DlstateError;
use async_trait::async_trait;
use dlstate_types::Download;
use uuid::Uuid;

/// Durable store for download records
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Full-record upsert
    async fn update(&self, download: &Download) -> Result<(), DlstateError>;

    /// Narrow checkpoint write: byte counts and status only
    async fn update_file_bytes_and_status_only(
        &self,
        download: &Download,
    ) -> Result<(), DlstateError>;

    /// Remove a record. Removing a record that is not stored is not an error.
    async fn delete_download(&self, download: &Download) -> Result<(), DlstateError>;

    async fn load_download(&self, id: Uuid) -> Result<Option<Download>, DlstateError>;

    async fn load_all_downloads(&self) -> Result<Vec<Download>, DlstateError>;
}
