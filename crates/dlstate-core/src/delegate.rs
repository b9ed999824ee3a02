//! Lifecycle delegate - the engine's callback target
//!
//! The engine reports what happened to a download; the delegate:
//! - moves the record to its new status
//! - persists it (or removes it, per the cleanup policy)
//! - queues the matching listener notification
//!
//! Handlers never fail toward the engine. Persistence, notification and
//! file-cleanup errors all go through [`LifecycleDelegate::swallow`], which
//! logs them under [`LOG_TARGET`] and drops them.

use crate::cleanup::{CleanupAction, CleanupPolicy, TerminalKind};
use crate::dispatcher::{DownloadListener, NotificationDispatcher, ProgressTask};
use crate::error::DlstateError;
use crate::files::FileSystem;
use crate::store::DownloadStore;
use dlstate_types::{
    DelegateSettings, Download, DownloadError, DownloadNotification, RequestOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Fixed log target for failures swallowed by the delegate
pub const LOG_TARGET: &str = "dlstate::delegate";

/// One engine callback. The record is lent for the duration of the call only.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    Started {
        download: &'a mut Download,
        eta_ms: i64,
        bytes_per_second: i64,
    },
    Progress {
        download: &'a mut Download,
        eta_ms: i64,
        bytes_per_second: i64,
    },
    Error {
        download: &'a mut Download,
    },
    Completed {
        download: &'a mut Download,
    },
    /// Periodic byte-count checkpoint
    Checkpoint {
        download: &'a mut Download,
    },
}

/// Turns engine events into store writes, cleanup and listener notifications
pub struct LifecycleDelegate {
    store: Arc<dyn DownloadStore>,
    files: Arc<dyn FileSystem>,
    dispatcher: NotificationDispatcher,
    retry_on_network_gain: bool,
    request_options: RequestOptions,
    temp_dir: PathBuf,
}

impl LifecycleDelegate {
    /// Create a delegate and start its notification consumer
    pub fn new(
        settings: &DelegateSettings,
        store: Arc<dyn DownloadStore>,
        files: Arc<dyn FileSystem>,
        listener: Arc<dyn DownloadListener>,
    ) -> Self {
        Self::with_dispatcher(settings, store, files, NotificationDispatcher::spawn(listener))
    }

    pub fn with_dispatcher(
        settings: &DelegateSettings,
        store: Arc<dyn DownloadStore>,
        files: Arc<dyn FileSystem>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            files,
            dispatcher,
            retry_on_network_gain: settings.retry_on_network_gain,
            request_options: settings.request_options.clone(),
            temp_dir: settings.temp_dir.clone(),
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Route an engine event to its handler
    pub async fn on_event(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::Started {
                download,
                eta_ms,
                bytes_per_second,
            } => self.on_started(download, eta_ms, bytes_per_second).await,
            EngineEvent::Progress {
                download,
                eta_ms,
                bytes_per_second,
            } => self.on_progress(download, eta_ms, bytes_per_second),
            EngineEvent::Error { download } => self.on_error(download).await,
            EngineEvent::Completed { download } => self.on_complete(download).await,
            EngineEvent::Checkpoint { download } => self.save_download_progress(download).await,
        }
    }

    pub async fn on_started(&self, download: &mut Download, eta_ms: i64, bytes_per_second: i64) {
        download.mark_downloading();
        let result = self.started(download, eta_ms, bytes_per_second).await;
        self.swallow("on_started", download.id, result);
    }

    /// Telemetry only: no status change and no store write
    pub fn on_progress(&self, download: &Download, eta_ms: i64, bytes_per_second: i64) {
        let result = self.dispatcher.enqueue_progress(ProgressTask {
            download: download.clone(),
            eta_ms,
            bytes_per_second,
        });
        self.swallow("on_progress", download.id, result);
    }

    pub async fn on_error(&self, download: &mut Download) {
        let result = self.failed(download).await;
        self.swallow("on_error", download.id, result);
    }

    pub async fn on_complete(&self, download: &mut Download) {
        download.mark_completed();
        let result = self.completed(download).await;
        self.swallow("on_complete", download.id, result);
    }

    /// Checkpoint byte counts with the narrow store write
    pub async fn save_download_progress(&self, download: &mut Download) {
        download.mark_downloading();
        let result = self.store.update_file_bytes_and_status_only(download).await;
        self.swallow("save_download_progress", download.id, result);
    }

    async fn started(
        &self,
        download: &Download,
        eta_ms: i64,
        bytes_per_second: i64,
    ) -> Result<(), DlstateError> {
        self.store.update(download).await?;
        info!("Download {} started", download.id);
        self.dispatcher.enqueue(DownloadNotification::Progress {
            download: download.clone(),
            eta_ms,
            bytes_per_second,
        })
    }

    async fn failed(&self, download: &mut Download) -> Result<(), DlstateError> {
        if self.retry_on_network_gain && download.error() == DownloadError::NoNetworkConnection {
            download.mark_queued();
            self.store.update(download).await?;
            info!("Download {} lost network, requeued", download.id);
            return self.dispatcher.enqueue_queued(download);
        }

        download.mark_failed();
        self.apply_cleanup(TerminalKind::Failed, download).await?;
        info!("Download {} failed: {}", download.id, download.error());
        self.dispatcher.enqueue_error(download)
    }

    async fn completed(&self, download: &Download) -> Result<(), DlstateError> {
        self.apply_cleanup(TerminalKind::Completed, download).await?;
        info!("Download {} completed", download.id);
        self.dispatcher.enqueue_completed(download)
    }

    /// Remove the record (and file) if the options say so, else persist it
    async fn apply_cleanup(
        &self,
        kind: TerminalKind,
        download: &Download,
    ) -> Result<(), DlstateError> {
        let options = self.request_options.union(&download.options);
        let action = CleanupPolicy::decide(kind, &options);

        if action.keeps_record() {
            return self.store.update(download).await;
        }

        self.store.delete_download(download).await?;
        debug!("Removed record of download {}", download.id);

        if action == CleanupAction::RemoveRecordAndFile {
            self.delete_download_file(download).await;
        }
        Ok(())
    }

    /// Best-effort: the record is already gone, so failures are only logged
    async fn delete_download_file(&self, download: &Download) {
        if !self.files.exists(&download.file).await {
            debug!("File {:?} already gone, skipping file cleanup", download.file);
            return;
        }

        if let Err(e) = self.files.delete_file(&download.file).await {
            warn!(
                target: LOG_TARGET,
                download_id = %download.id,
                "Failed to delete file {:?}: {}",
                download.file,
                e
            );
        }
        if let Err(e) = self.files.delete_temp_files(&self.temp_dir, download).await {
            warn!(
                target: LOG_TARGET,
                download_id = %download.id,
                "Failed to delete temp files: {}",
                e
            );
        }
    }

    fn swallow(&self, operation: &'static str, id: Uuid, result: Result<(), DlstateError>) {
        if let Err(e) = result {
            error!(
                target: LOG_TARGET,
                download_id = %id,
                operation,
                class = e.class(),
                "{}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ChannelListener;
    use crate::files::LocalFileSystem;
    use crate::store::{DownloadDatabase, MemoryStore, StoreWrite};
    use dlstate_types::{DownloadStatus, RequestOption};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        dir: TempDir,
        store: Arc<MemoryStore>,
        delegate: LifecycleDelegate,
        rx: mpsc::UnboundedReceiver<DownloadNotification>,
    }

    impl Harness {
        fn new(retry_on_network_gain: bool, request_options: RequestOptions) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = DelegateSettings {
                retry_on_network_gain,
                temp_dir: dir.path().join("temp"),
                request_options,
            };
            let store = Arc::new(MemoryStore::new());
            let (listener, rx) = ChannelListener::new();
            let delegate = LifecycleDelegate::new(
                &settings,
                store.clone(),
                Arc::new(LocalFileSystem),
                Arc::new(listener),
            );
            Self {
                dir,
                store,
                delegate,
                rx,
            }
        }

        fn download(&self, name: &str) -> Download {
            Download::new(format!("http://example.com/{}", name), self.dir.path().join(name))
        }

        fn temp_dir(&self) -> PathBuf {
            self.dir.path().join("temp")
        }

        async fn notifications(&mut self) -> Vec<DownloadNotification> {
            self.delegate.dispatcher().flush().await.unwrap();
            let mut out = Vec::new();
            while let Ok(notification) = self.rx.try_recv() {
                out.push(notification);
            }
            out
        }
    }

    fn kinds(notifications: &[DownloadNotification]) -> Vec<&'static str> {
        notifications.iter().map(|n| n.kind()).collect()
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"data").unwrap();
    }

    #[tokio::test]
    async fn test_started_persists_and_notifies_progress() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");

        h.delegate.on_started(&mut download, 5000, 128).await;

        assert_eq!(download.status(), DownloadStatus::Downloading);
        assert_eq!(h.store.journal(), vec![StoreWrite::Update(download.id)]);
        let seen = h.notifications().await;
        assert_eq!(
            seen,
            vec![DownloadNotification::Progress {
                download: download.clone(),
                eta_ms: 5000,
                bytes_per_second: 128,
            }]
        );
    }

    #[tokio::test]
    async fn test_progress_does_not_touch_store_or_status() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");
        h.delegate.on_started(&mut download, 0, 0).await;

        download.downloaded = 10;
        h.delegate.on_progress(&download, 100, 10);

        assert_eq!(download.status(), DownloadStatus::Downloading);
        assert_eq!(h.store.journal().len(), 1);
        let seen = h.notifications().await;
        assert_eq!(seen.last().map(|n| n.download().downloaded), Some(10));
    }

    #[tokio::test]
    async fn test_complete_without_flags_persists() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");

        h.delegate.on_complete(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Completed);
        assert!(download.error().is_none());
        let stored = h.store.get(download.id).unwrap();
        assert_eq!(stored.status(), DownloadStatus::Completed);
        assert_eq!(kinds(&h.notifications().await), vec!["completed"]);
    }

    #[tokio::test]
    async fn test_complete_with_remove_flag_deletes_record_only() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnCompleted]));
        h.store.update(&download).await.unwrap();
        touch(&download.file);

        h.delegate.on_complete(&mut download).await;

        assert!(h.store.get(download.id).is_none());
        assert!(download.file.exists());
        assert_eq!(kinds(&h.notifications().await), vec!["completed"]);
    }

    #[tokio::test]
    async fn test_complete_with_delete_file_flag_removes_file_and_temps() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnCompletedDeleteFile]));
        h.store.update(&download).await.unwrap();
        let part = h.temp_dir().join(format!("{}_segment_0.part", download.id));
        touch(&download.file);
        touch(&part);

        h.delegate.on_complete(&mut download).await;

        assert!(h.store.get(download.id).is_none());
        assert!(!download.file.exists());
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_missing_file_skips_temp_cleanup() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnCompletedDeleteFile]));
        let part = h.temp_dir().join(format!("{}_segment_0.part", download.id));
        touch(&part);

        h.delegate.on_complete(&mut download).await;

        assert_eq!(h.store.journal(), vec![StoreWrite::Delete(download.id)]);
        assert!(part.exists());
        assert_eq!(kinds(&h.notifications().await), vec!["completed"]);
    }

    #[tokio::test]
    async fn test_record_only_flag_wins_and_file_survives() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin").with_options(RequestOptions::from([
            RequestOption::RemoveOnFailedDeleteFile,
            RequestOption::RemoveOnFailed,
        ]));
        touch(&download.file);
        download.fail_with(DownloadError::HttpNotFound);

        h.delegate.on_error(&mut download).await;

        assert_eq!(h.store.journal(), vec![StoreWrite::Delete(download.id)]);
        assert!(download.file.exists());
    }

    #[tokio::test]
    async fn test_delegate_level_options_apply() {
        let mut h = Harness::new(true, RequestOptions::from([RequestOption::RemoveOnFailed]));
        let mut download = h.download("a.bin");
        download.fail_with(DownloadError::WriteError);

        h.delegate.on_error(&mut download).await;

        assert_eq!(h.store.journal(), vec![StoreWrite::Delete(download.id)]);
        assert_eq!(kinds(&h.notifications().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_network_loss_requeues_when_enabled() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnFailed]));
        download.fail_with(DownloadError::NoNetworkConnection);

        h.delegate.on_error(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Queued);
        assert!(download.error().is_none());
        let stored = h.store.get(download.id).unwrap();
        assert_eq!(stored.status(), DownloadStatus::Queued);
        assert_eq!(kinds(&h.notifications().await), vec!["queued"]);
    }

    #[tokio::test]
    async fn test_network_loss_fails_when_retry_disabled() {
        let mut h = Harness::new(false, RequestOptions::none());
        let mut download = h.download("a.bin");
        download.fail_with(DownloadError::NoNetworkConnection);

        h.delegate.on_error(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Failed);
        assert_eq!(download.error(), DownloadError::NoNetworkConnection);
        let stored = h.store.get(download.id).unwrap();
        assert_eq!(stored.status(), DownloadStatus::Failed);
        assert_eq!(kinds(&h.notifications().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_other_errors_fail_even_with_retry_enabled() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");
        download.fail_with(DownloadError::ConnectionTimedOut);

        h.delegate.on_error(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Failed);
        assert_eq!(kinds(&h.notifications().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_checkpoint_uses_narrow_write() {
        let h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");
        download.downloaded = 2048;

        h.delegate.save_download_progress(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Downloading);
        assert_eq!(h.store.journal(), vec![StoreWrite::Checkpoint(download.id)]);
    }

    #[tokio::test]
    async fn test_double_complete_on_removed_record_is_quiet() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnCompleted]));

        h.delegate.on_complete(&mut download).await;
        h.delegate.on_complete(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Completed);
        assert!(h.store.get(download.id).is_none());
        assert_eq!(kinds(&h.notifications().await), vec!["completed", "completed"]);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");
        h.store.set_fail_writes(true);

        h.delegate.on_started(&mut download, 0, 0).await;
        h.delegate.on_complete(&mut download).await;
        h.delegate.save_download_progress(&mut download).await;

        assert_eq!(download.status(), DownloadStatus::Downloading);
        assert!(h.store.journal().is_empty());
        assert!(h.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_with_delete_file_flag_removes_file_and_temps() {
        let mut h = Harness::new(false, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnFailedDeleteFile]));
        h.store.update(&download).await.unwrap();
        let part = h.temp_dir().join(format!("{}_segment_0.part", download.id));
        touch(&download.file);
        touch(&part);
        download.fail_with(DownloadError::NoStorageSpace);

        h.delegate.on_error(&mut download).await;

        assert!(h.store.get(download.id).is_none());
        assert!(!download.file.exists());
        assert!(!part.exists());
        assert_eq!(kinds(&h.notifications().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_undeletable_file_still_notifies_completion() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h
            .download("a.bin")
            .with_options(RequestOptions::from([RequestOption::RemoveOnCompletedDeleteFile]));
        h.store.update(&download).await.unwrap();
        // a directory exists but cannot be removed with remove_file
        std::fs::create_dir_all(&download.file).unwrap();

        h.delegate.on_complete(&mut download).await;

        assert!(h.store.get(download.id).is_none());
        assert!(download.file.exists());
        assert_eq!(kinds(&h.notifications().await), vec!["completed"]);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_is_swallowed() {
        let h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");
        h.delegate.dispatcher().shutdown().await;

        h.delegate.on_complete(&mut download).await;
        h.delegate.on_progress(&download, 0, 0);

        assert_eq!(
            h.store.get(download.id).map(|d| d.status()),
            Some(DownloadStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_on_event_routes_by_type() {
        let mut h = Harness::new(true, RequestOptions::none());
        let mut download = h.download("a.bin");

        h.delegate
            .on_event(EngineEvent::Started {
                download: &mut download,
                eta_ms: 1,
                bytes_per_second: 1,
            })
            .await;
        h.delegate
            .on_event(EngineEvent::Checkpoint {
                download: &mut download,
            })
            .await;
        download.fail_with(DownloadError::Unknown);
        h.delegate
            .on_event(EngineEvent::Error {
                download: &mut download,
            })
            .await;

        assert_eq!(download.status(), DownloadStatus::Failed);
        assert_eq!(
            h.store.journal(),
            vec![
                StoreWrite::Update(download.id),
                StoreWrite::Checkpoint(download.id),
                StoreWrite::Update(download.id),
            ]
        );
        assert_eq!(kinds(&h.notifications().await), vec!["progress", "error"]);
    }

    #[tokio::test]
    async fn test_network_recovery_scenario_against_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DelegateSettings {
            retry_on_network_gain: true,
            temp_dir: dir.path().join("temp"),
            request_options: RequestOptions::none(),
        };
        let db = Arc::new(DownloadDatabase::new(dir.path().join("downloads.db")).await.unwrap());
        let (listener, mut rx) = ChannelListener::new();
        let delegate = LifecycleDelegate::new(
            &settings,
            db.clone(),
            Arc::new(LocalFileSystem),
            Arc::new(listener),
        );
        let mut download = Download::new("http://example.com/d.bin", dir.path().join("d.bin"));

        delegate.on_started(&mut download, 1000, 64).await;
        assert_eq!(download.status(), DownloadStatus::Downloading);

        download.fail_with(DownloadError::NoNetworkConnection);
        delegate.on_error(&mut download).await;
        assert_eq!(download.status(), DownloadStatus::Queued);
        assert!(download.error().is_none());
        let stored = db.load_download(download.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), DownloadStatus::Queued);
        assert!(stored.error().is_none());

        download.downloaded = 4096;
        download.total = Some(4096);
        delegate.on_complete(&mut download).await;
        let stored = db.load_download(download.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), DownloadStatus::Completed);
        assert_eq!(stored.downloaded, 4096);

        delegate.dispatcher().flush().await.unwrap();
        let mut seen = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            seen.push(notification.kind());
        }
        assert_eq!(seen, vec!["progress", "queued", "completed"]);
    }
}
