//! statkeep-agent — host metric sampler and reporter.
//!
//! Two loops run side by side: the sampler refreshes [`Readings`] every
//! poll interval and publishes them on a `watch` channel, the reporter
//! takes the latest readings every report interval and posts them to the
//! collector as one gzipped, optionally signed batch.

pub mod error;
pub mod reporter;
pub mod sampler;

pub use error::{AgentError, AgentResult};
pub use reporter::{Reporter, run_reporter};
pub use sampler::{Readings, Sampler, run_sampler};
