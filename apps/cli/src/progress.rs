//! Progress bars driven by listener notifications

use crate::output::{format_eta, format_speed};
use console::style;
use dlstate_types::{Download, DownloadNotification};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use uuid::Uuid;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}";

/// One progress bar per download seen in a replay
pub struct ReplayProgress {
    multi: MultiProgress,
    bars: HashMap<Uuid, ProgressBar>,
}

impl ReplayProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_for(&mut self, download: &Download) -> ProgressBar {
        if let Some(pb) = self.bars.get(&download.id) {
            return pb.clone();
        }

        let pb = self.multi.add(ProgressBar::new(download.total.unwrap_or(0)));
        if let Ok(bar_style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(bar_style.progress_chars("█▓▒░  "));
        }
        pb.set_prefix(download.file_name());
        pb.set_position(download.downloaded);

        self.bars.insert(download.id, pb.clone());
        pb
    }

    /// Update the bar of the download a notification is about
    pub fn handle(&mut self, notification: &DownloadNotification) {
        let download = notification.download();
        let pb = self.bar_for(download);

        if let Some(total) = download.total {
            pb.set_length(total);
        }
        pb.set_position(download.downloaded);

        match notification {
            DownloadNotification::Progress {
                eta_ms,
                bytes_per_second,
                ..
            } => {
                pb.set_message(format!(
                    "{} eta {}",
                    format_speed(*bytes_per_second),
                    format_eta(*eta_ms)
                ));
            }
            DownloadNotification::Queued { .. } => {
                pb.set_message(format!("{} Queued", style("⏸").yellow()));
            }
            DownloadNotification::Error { download } => {
                pb.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    download.error()
                ));
            }
            DownloadNotification::Completed { .. } => {
                pb.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
            }
        }
    }

    /// Clear all progress bars
    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }
}

impl Default for ReplayProgress {
    fn default() -> Self {
        Self::new()
    }
}
