//! statkeep-state — the in-memory metric store for statkeep.
//!
//! Holds the authoritative gauge and counter maps plus the wire types
//! producers and collectors exchange.
//!
//! # Architecture
//!
//! ```text
//! Sample (wire JSON) ──try_from──▶ Update (validated)
//!                                      │
//! MetricStore ◀── StoreWriter ◀────────┘   (one exclusive lock per batch)
//!   └── all() → Snapshot                   (consistent read of both maps)
//! ```
//!
//! The `MetricStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<RwLock<_>>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{MetricStore, StoreWriter};
pub use types::*;
