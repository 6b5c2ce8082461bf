//! Error types for the escalation engine.

use thiserror::Error;

/// Result type for escalation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the escalation engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Alert group or collaborator not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage operation failed.
    #[error("Storage failed: {0}")]
    Storage(String),

    /// Optimistic concurrency check failed.
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Task queue error.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<oncore_storage::Error> for Error {
    fn from(e: oncore_storage::Error) -> Self {
        match e {
            oncore_storage::Error::NotFound(msg) => Error::NotFound(msg),
            oncore_storage::Error::VersionConflict { .. } => Error::VersionConflict(e.to_string()),
            oncore_storage::Error::Serialization(msg) => Error::Serialization(msg),
            _ => Error::Storage(e.to_string()),
        }
    }
}

impl From<oncore_core::Error> for Error {
    fn from(e: oncore_core::Error) -> Self {
        match e {
            oncore_core::Error::NotFound(msg) => Error::NotFound(msg),
            oncore_core::Error::Validation(msg) => Error::Validation(msg),
            oncore_core::Error::Queue(msg) => Error::Queue(msg),
            oncore_core::Error::Storage(msg) => Error::Storage(msg),
            oncore_core::Error::Serialization(msg) => Error::Serialization(msg),
            oncore_core::Error::Other(e) => Error::Other(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
