//! Error types for persistence backends.

use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("snapshot read failed: {0}")]
    SnapshotRead(String),

    #[error("snapshot write failed: {0}")]
    SnapshotWrite(String),
}

impl BackendError {
    /// Whether the failure is the infrastructure being unavailable.
    pub fn is_connection(&self) -> bool {
        matches!(self, BackendError::Connection(_))
    }
}
