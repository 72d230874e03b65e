//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store load or persist failed.
    #[error("store error: {0}")]
    Store(#[from] solstice_store::StoreError),

    /// A schedule could not produce a next fire time.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Errors surfaced by host collaborator calls.
#[derive(Debug, Error)]
pub enum HostError {
    /// The host does not implement this hook; callers fall back where a
    /// fallback exists.
    #[error("hook not supported by host")]
    Unsupported,

    /// The collaborator call failed.
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Convenience constructor for hosts bubbling up arbitrary errors.
    pub fn failed(e: impl std::fmt::Display) -> Self {
        HostError::Failed(e.to_string())
    }
}
