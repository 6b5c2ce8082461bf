//! Error types for the notification system.

use thiserror::Error;

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while notifying users.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend or user not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Send operation failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(#[from] anyhow::Error),
}
