//! statkeep-service — the update and query surface over a backend.
//!
//! The transport layer hands raw `(kind, name, value)` triples or JSON
//! samples to [`UpdateService`]; it validates them into typed updates and
//! applies them through whichever [`MetricsBackend`] the daemon selected.
//!
//! [`MetricsBackend`]: statkeep_persist::MetricsBackend

pub mod error;
pub mod service;

pub use error::{UpdateError, UpdateResult};
pub use service::UpdateService;
