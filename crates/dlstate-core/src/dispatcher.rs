//! Notification dispatcher - ordered, single-consumer listener delivery
//!
//! Every listener callback runs on one consumer task, never on the task that
//! reported the engine event. Status notifications are delivered in the order
//! they were enqueued. Progress goes through a single "latest value" slot:
//! a burst of progress for the same download collapses into whatever value is
//! newest when the consumer gets to it, so intermediate values may be skipped
//! but are never delivered out of order, and the last one is always delivered.
//!
//! A status notification (or progress for a different download) seals the
//! pending progress into the queue ahead of itself, so progress never
//! overtakes a notification that was accepted after it.

use crate::error::DlstateError;
use dlstate_types::{Download, DownloadNotification};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// External observer of download lifecycle changes
pub trait DownloadListener: Send + Sync {
    fn on_queued(&self, download: &Download);

    fn on_progress(&self, download: &Download, eta_ms: i64, bytes_per_second: i64);

    fn on_error(&self, download: &Download);

    fn on_completed(&self, download: &Download);
}

/// The latest reported progress of a download
#[derive(Debug, Clone)]
pub struct ProgressTask {
    pub download: Download,
    pub eta_ms: i64,
    pub bytes_per_second: i64,
}

impl ProgressTask {
    fn into_notification(self) -> DownloadNotification {
        DownloadNotification::Progress {
            download: self.download,
            eta_ms: self.eta_ms,
            bytes_per_second: self.bytes_per_second,
        }
    }
}

enum Job {
    Notify(DownloadNotification),
    /// Deliver the slot content if it still belongs to this marker
    Progress(u64),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct PendingProgress {
    marker: u64,
    task: ProgressTask,
}

#[derive(Default)]
struct ProgressSlot {
    next_marker: u64,
    pending: Option<PendingProgress>,
}

/// Single-consumer queue in front of a [`DownloadListener`]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Job>,
    slot: Arc<Mutex<ProgressSlot>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn spawn(listener: Arc<dyn DownloadListener>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(Mutex::new(ProgressSlot::default()));

        let consumer = tokio::spawn(run_consumer(rx, slot.clone(), listener));

        Self {
            tx,
            slot,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    pub fn enqueue_queued(&self, download: &Download) -> Result<(), DlstateError> {
        self.enqueue(DownloadNotification::Queued {
            download: download.clone(),
        })
    }

    pub fn enqueue_error(&self, download: &Download) -> Result<(), DlstateError> {
        self.enqueue(DownloadNotification::Error {
            download: download.clone(),
        })
    }

    pub fn enqueue_completed(&self, download: &Download) -> Result<(), DlstateError> {
        self.enqueue(DownloadNotification::Completed {
            download: download.clone(),
        })
    }

    /// Enqueue a notification in FIFO order, sealing any pending progress first
    ///
    /// Progress passed here is not coalesced; use [`Self::enqueue_progress`]
    /// for telemetry ticks.
    pub fn enqueue(&self, notification: DownloadNotification) -> Result<(), DlstateError> {
        let mut slot = self.slot.lock();
        if let Some(pending) = slot.pending.take() {
            self.send(Job::Notify(pending.task.into_notification()))?;
        }
        self.send(Job::Notify(notification))
    }

    /// Overwrite the progress slot; queue a wake-up only if it was empty
    pub fn enqueue_progress(&self, task: ProgressTask) -> Result<(), DlstateError> {
        let mut slot = self.slot.lock();

        match slot.pending.take() {
            Some(pending) if pending.task.download.id == task.download.id => {
                slot.pending = Some(PendingProgress {
                    marker: pending.marker,
                    task,
                });
                return Ok(());
            }
            Some(pending) => {
                self.send(Job::Notify(pending.task.into_notification()))?;
            }
            None => {}
        }

        slot.next_marker += 1;
        let marker = slot.next_marker;
        slot.pending = Some(PendingProgress { marker, task });
        self.send(Job::Progress(marker))
    }

    /// Wait until everything enqueued so far has been delivered
    pub async fn flush(&self) -> Result<(), DlstateError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Job::Flush(done_tx))?;
        done_rx.await.map_err(|_| DlstateError::DispatcherClosed)
    }

    /// Deliver what is queued, then stop the consumer
    pub async fn shutdown(&self) {
        let _ = self.send(Job::Shutdown);
        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                warn!("Notification consumer ended abnormally: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, job: Job) -> Result<(), DlstateError> {
        self.tx.send(job).map_err(|_| DlstateError::DispatcherClosed)
    }
}

async fn run_consumer(
    mut rx: mpsc::UnboundedReceiver<Job>,
    slot: Arc<Mutex<ProgressSlot>>,
    listener: Arc<dyn DownloadListener>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Notify(notification) => deliver(listener.as_ref(), notification),
            Job::Progress(marker) => {
                let task = {
                    let mut slot = slot.lock();
                    match slot.pending.as_ref() {
                        Some(pending) if pending.marker == marker => {
                            slot.pending.take().map(|p| p.task)
                        }
                        _ => None,
                    }
                };
                if let Some(task) = task {
                    deliver(listener.as_ref(), task.into_notification());
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
            Job::Shutdown => break,
        }
    }
    debug!("Notification consumer stopped");
}

fn deliver(listener: &dyn DownloadListener, notification: DownloadNotification) {
    match &notification {
        DownloadNotification::Queued { download } => listener.on_queued(download),
        DownloadNotification::Progress {
            download,
            eta_ms,
            bytes_per_second,
        } => listener.on_progress(download, *eta_ms, *bytes_per_second),
        DownloadNotification::Error { download } => listener.on_error(download),
        DownloadNotification::Completed { download } => listener.on_completed(download),
    }
}

// ============================================================================
// Listener adapters
// ============================================================================

/// Forwards callbacks as [`DownloadNotification`]s into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<DownloadNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, notification: DownloadNotification) {
        let _ = self.tx.send(notification);
    }
}

impl DownloadListener for ChannelListener {
    fn on_queued(&self, download: &Download) {
        self.forward(DownloadNotification::Queued {
            download: download.clone(),
        });
    }

    fn on_progress(&self, download: &Download, eta_ms: i64, bytes_per_second: i64) {
        self.forward(DownloadNotification::Progress {
            download: download.clone(),
            eta_ms,
            bytes_per_second,
        });
    }

    fn on_error(&self, download: &Download) {
        self.forward(DownloadNotification::Error {
            download: download.clone(),
        });
    }

    fn on_completed(&self, download: &Download) {
        self.forward(DownloadNotification::Completed {
            download: download.clone(),
        });
    }
}

/// Fans callbacks out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    event_tx: broadcast::Sender<DownloadNotification>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadNotification> {
        self.event_tx.subscribe()
    }

    fn emit(&self, notification: DownloadNotification) {
        let _ = self.event_tx.send(notification);
    }
}

impl DownloadListener for BroadcastListener {
    fn on_queued(&self, download: &Download) {
        self.emit(DownloadNotification::Queued {
            download: download.clone(),
        });
    }

    fn on_progress(&self, download: &Download, eta_ms: i64, bytes_per_second: i64) {
        self.emit(DownloadNotification::Progress {
            download: download.clone(),
            eta_ms,
            bytes_per_second,
        });
    }

    fn on_error(&self, download: &Download) {
        self.emit(DownloadNotification::Error {
            download: download.clone(),
        });
    }

    fn on_completed(&self, download: &Download) {
        self.emit(DownloadNotification::Completed {
            download: download.clone(),
        });
    }
}

/// Discards every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl DownloadListener for NoopListener {
    fn on_queued(&self, _download: &Download) {}

    fn on_progress(&self, _download: &Download, _eta_ms: i64, _bytes_per_second: i64) {}

    fn on_error(&self, _download: &Download) {}

    fn on_completed(&self, _download: &Download) {}
}
