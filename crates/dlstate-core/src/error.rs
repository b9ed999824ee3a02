//! Error types for dlstate core

use thiserror::Error;

/// Errors that can occur while reacting to engine events
#[derive(Debug, Error)]
pub enum DlstateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Notification dispatcher is closed")]
    DispatcherClosed,

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

impl DlstateError {
    /// Which failure class this error belongs to
    pub fn class(&self) -> &'static str {
        match self {
            DlstateError::Database(_)
            | DlstateError::Serialization(_)
            | DlstateError::InvalidRecord(_) => "persistence",
            DlstateError::DispatcherClosed => "notification",
            DlstateError::Io(_) => "filesystem",
        }
    }
}

impl From<serde_json::Error> for DlstateError {
    fn from(error: serde_json::Error) -> Self {
        DlstateError::Serialization(error.to_string())
    }
}

