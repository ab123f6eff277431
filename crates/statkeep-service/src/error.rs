//! Error types for the update service.

use thiserror::Error;

use statkeep_persist::BackendError;
use statkeep_state::{MetricKind, StateError};

/// Result type alias for service operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors surfaced to the transport layer.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("malformed {kind} value for {name}: {reason}")]
    MalformedValue {
        kind: MetricKind,
        name: String,
        reason: String,
    },

    #[error("unsupported metric type: {0}")]
    UnsupportedType(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl UpdateError {
    /// Whether the caller sent bad input (as opposed to an infrastructure fault).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UpdateError::Backend(_))
    }
}

impl From<StateError> for UpdateError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::UnsupportedType(kind) => UpdateError::UnsupportedType(kind),
            StateError::MalformedValue { kind, name, reason } => {
                UpdateError::MalformedValue { kind, name, reason }
            }
        }
    }
}
