//! statkeep-persist — durable storage strategies behind one interface.
//!
//! Every backend implements [`MetricsBackend`]: apply a batch of updates,
//! read single metrics or the full state, and report reachability. The
//! daemon picks one implementation at startup.
//!
//! # Architecture
//!
//! ```text
//! MemoryBackend (MetricStore)
//!   ├── apply()        merge under the store write lock
//!   ├── sync file      merge into a copy, write it, then swap in (interval 0)
//!   └── FileSnapshotter::run() → periodic snapshot::write_file()
//!
//! PostgresBackend (sqlx PgPool)
//!   └── apply()        one transaction of atomic upserts per batch
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod snapshot;

pub use backend::{BackendFuture, MetricsBackend};
pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use snapshot::FileSnapshotter;
