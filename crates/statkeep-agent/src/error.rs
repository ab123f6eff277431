//! Agent error types.

use thiserror::Error;

use statkeep_sign::IntegrityError;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("connecting to collector at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("sending report: {0}")]
    Request(String),

    #[error("collector answered {0}")]
    Status(u16),

    #[error("report timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("encoding report: {0}")]
    Encode(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}
