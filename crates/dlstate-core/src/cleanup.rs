//! Post-terminal cleanup policy
//!
//! Decides from a download's request options whether its record, and
//! possibly its file, is removed once it reaches a terminal state.

use dlstate_types::{RequestOption, RequestOptions};

/// Terminal state a cleanup decision is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Failed,
    Completed,
}

/// What to do with a terminal download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Nothing to remove; the caller persists the updated record
    Keep,
    RemoveRecord,
    /// Remove the record, then the file and its temp files if the file exists
    RemoveRecordAndFile,
}

impl CleanupAction {
    pub fn keeps_record(&self) -> bool {
        matches!(self, CleanupAction::Keep)
    }
}

pub struct CleanupPolicy;

impl CleanupPolicy {
    /// Record-only removal is checked before removal that also deletes the file.
    pub fn decide(kind: TerminalKind, options: &RequestOptions) -> CleanupAction {
        let (remove, remove_with_file) = match kind {
            TerminalKind::Failed => (
                RequestOption::RemoveOnFailed,
                RequestOption::RemoveOnFailedDeleteFile,
            ),
            TerminalKind::Completed => (
                RequestOption::RemoveOnCompleted,
                RequestOption::RemoveOnCompletedDeleteFile,
            ),
        };

        if options.contains(remove) {
            CleanupAction::RemoveRecord
        } else if options.contains(remove_with_file) {
            CleanupAction::RemoveRecordAndFile
        } else {
            CleanupAction::Keep
        }
    }
}
