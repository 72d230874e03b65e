//! Error types for the job store.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read or write the store file.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file contents could not be parsed.
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A job with this id already exists.
    #[error("job already exists: {0}")]
    JobExists(String),

    /// No job with this id.
    #[error("job not found: {0}")]
    JobNotFound(String),
}
