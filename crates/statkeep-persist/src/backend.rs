//! The storage capability shared by all backends.

use std::future::Future;
use std::pin::Pin;

use statkeep_state::{MetricValue, Snapshot, Update};

use crate::error::BackendResult;

/// Boxed future alias for backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// Makes metric state durable and readable.
///
/// `apply` must merge gauges by overwrite and counters by addition, and
/// must apply the whole batch or none of it. It returns the value each
/// update left behind, in input order.
pub trait MetricsBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Apply a validated batch of updates.
    fn apply<'a>(&'a self, updates: &'a [Update]) -> BackendFuture<'a, Vec<MetricValue>>;

    /// Current value of a gauge, `None` if never written.
    fn gauge<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<f64>>;

    /// Current value of a counter, `None` if never written.
    fn counter<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<i64>>;

    /// Consistent copy of all gauges and counters.
    fn snapshot(&self) -> BackendFuture<'_, Snapshot>;

    /// Succeeds iff the backing medium is reachable.
    fn ping(&self) -> BackendFuture<'_, ()>;
}
