//! Error types for metric parsing and validation.

use thiserror::Error;

use crate::types::MetricKind;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised while turning raw input into typed metric updates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("unsupported metric type: {0}")]
    UnsupportedType(String),

    #[error("malformed {kind} value for {name}: {reason}")]
    MalformedValue {
        kind: MetricKind,
        name: String,
        reason: String,
    },
}
