//! In-memory store adapter

use super::DownloadStore;
use crate::error::DlstateError;
use async_trait::async_trait;
use dlstate_types::{Download, DownloadStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A write made against a [`MemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWrite {
    Update(Uuid),
    Checkpoint(Uuid),
    Delete(Uuid),
}

/// Download store backed by a map
///
/// Keeps a journal of writes and can be told to reject them, which lets tests
/// observe exactly which persistence path the delegate took.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, Download>>,
    journal: RwLock<Vec<StoreWrite>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Writes performed so far, oldest first
    pub fn journal(&self) -> Vec<StoreWrite> {
        self.journal.read().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Download> {
        self.records.read().get(&id).cloned()
    }

    fn check_writable(&self) -> Result<(), DlstateError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(DlstateError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn update(&self, download: &Download) -> Result<(), DlstateError> {
        self.check_writable()?;
        self.records.write().insert(download.id, download.clone());
        self.journal.write().push(StoreWrite::Update(download.id));
        Ok(())
    }

    async fn update_file_bytes_and_status_only(
        &self,
        download: &Download,
    ) -> Result<(), DlstateError> {
        self.check_writable()?;
        if let Some(stored) = self.records.write().get_mut(&download.id) {
            stored.downloaded = download.downloaded;
            stored.total = download.total;
            match download.status() {
                DownloadStatus::Downloading => stored.mark_downloading(),
                DownloadStatus::Queued => stored.mark_queued(),
                DownloadStatus::Completed => stored.mark_completed(),
                DownloadStatus::Failed => stored.fail_with(download.error()),
            }
        }
        self.journal.write().push(StoreWrite::Checkpoint(download.id));
        Ok(())
    }

    async fn delete_download(&self, download: &Download) -> Result<(), DlstateError> {
        self.check_writable()?;
        self.records.write().remove(&download.id);
        self.journal.write().push(StoreWrite::Delete(download.id));
        Ok(())
    }

    async fn load_download(&self, id: Uuid) -> Result<Option<Download>, DlstateError> {
        Ok(self.get(id))
    }

    async fn load_all_downloads(&self) -> Result<Vec<Download>, DlstateError> {
        let mut downloads: Vec<Download> = self.records.read().values().cloned().collect();
        downloads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(downloads)
    }
}
