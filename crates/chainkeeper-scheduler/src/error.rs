//! Error types for the scheduler.

use chainkeeper_coordination::{LockError, StoreError};
use thiserror::Error;

/// Errors raised while defining, arming or coordinating jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Two definitions share a code.
    #[error("Duplicate job code: {0}")]
    DuplicateJob(String),

    /// No definition with this code.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The definition names a handler that is not registered.
    #[error("Job {code} references unknown handler {handler}")]
    UnknownHandler { code: String, handler: String },

    /// The definition cannot be scheduled.
    #[error("Invalid job definition {code}: {message}")]
    InvalidDefinition { code: String, message: String },

    /// Stored runtime state could not be decoded.
    #[error("Invalid runtime state for job {code}: {source}")]
    InvalidState {
        code: String,
        #[source]
        source: serde_json::Error,
    },

    /// Coordination store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Distributed lock failure.
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Errors returned by job bodies.
#[derive(Debug, Error)]
pub enum JobError {
    /// The body could not take a lock it needs. Treated as "not executed".
    #[error("Failed to get lock {0}")]
    LockUnavailable(String),

    /// Parameters did not match what the body expects.
    #[error("Invalid job parameters: {0}")]
    InvalidParams(String),

    /// Any other failure.
    #[error("Job failed: {0}")]
    Failed(String),
}

impl From<LockError> for JobError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Unavailable(key) => JobError::LockUnavailable(key),
            other => JobError::Failed(other.to_string()),
        }
    }
}
