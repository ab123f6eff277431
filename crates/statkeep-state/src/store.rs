//! MetricStore — the in-memory gauge and counter maps.
//!
//! Both maps live behind one `RwLock`, so every mutation is serialized
//! and `all()` always sees a consistent pair. The store itself is a dumb
//! keyed map: `save_counter` writes an absolute value, accumulation is
//! done by callers holding a `StoreWriter`.

use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use tracing::debug;

use crate::types::{MetricValue, Snapshot, Update};

/// Thread-safe metric store.
#[derive(Clone, Default)]
pub struct MetricStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl MetricStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Set the gauge to exactly `value`.
    pub fn save_gauge(&self, name: &str, value: f64) {
        self.write().save_gauge(name, value);
    }

    /// Set the counter to `value` (absolute, not additive).
    pub fn save_counter(&self, name: &str, value: i64) {
        self.write().save_counter(name, value);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.read(|s| s.gauges.get(name).copied())
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.read(|s| s.counters.get(name).copied())
    }

    /// Copy of both maps taken under a single read lock.
    pub fn all(&self) -> Snapshot {
        self.read(Snapshot::clone)
    }

    /// Replace the whole store contents.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        debug!(
            gauges = snapshot.gauges.len(),
            counters = snapshot.counters.len(),
            "metric store restored"
        );
        *guard = snapshot;
    }

    /// Take the exclusive lock for a multi-step read-modify-write.
    ///
    /// Readers and other writers wait until the returned guard is dropped.
    pub fn write(&self) -> StoreWriter<'_> {
        StoreWriter {
            guard: self.inner.write().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

/// Exclusive access to the store for the lifetime of the guard.
pub struct StoreWriter<'a> {
    guard: RwLockWriteGuard<'a, Snapshot>,
}

impl StoreWriter<'_> {
    pub fn save_gauge(&mut self, name: &str, value: f64) {
        self.guard.gauges.insert(name.to_string(), value);
    }

    pub fn save_counter(&mut self, name: &str, value: i64) {
        self.guard.counters.insert(name.to_string(), value);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.guard.gauges.get(name).copied()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.guard.counters.get(name).copied()
    }

    /// Merge one update; see [`Snapshot::apply`].
    pub fn apply(&mut self, update: &Update) -> MetricValue {
        self.guard.apply(update)
    }

    /// Replace the whole contents with `snapshot`.
    pub fn replace(&mut self, snapshot: Snapshot) {
        *self.guard = snapshot;
    }

    /// Copy of the current contents, including writes made through this guard.
    pub fn snapshot(&self) -> Snapshot {
        self.guard.clone()
    }
}
