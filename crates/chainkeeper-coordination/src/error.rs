//! Coordination errors.

use thiserror::Error;

/// Errors raised by a coordination store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Store command failed: {0}")]
    Command(String),

    /// A stored value could not be interpreted.
    #[error("Invalid value at {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Errors raised by the distributed lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock parameters are unusable.
    #[error("Invalid lock: {0}")]
    InvalidLock(String),

    /// Another holder owns the lock.
    #[error("Failed to get lock {0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
