//! In-memory backend over a shared `MetricStore`.
//!
//! Updates merge under the store write lock. With a sync file configured
//! each batch is merged into a copy, written to disk, and only then
//! swapped into the store; otherwise durability comes from a
//! `FileSnapshotter` running alongside.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use statkeep_state::{MetricStore, MetricValue, Snapshot, Update};

use crate::backend::{BackendFuture, MetricsBackend};
use crate::error::{BackendError, BackendResult};
use crate::snapshot;

/// Backend holding all metrics in process memory.
pub struct MemoryBackend {
    store: MetricStore,
    /// Snapshot file rewritten after every batch, if any.
    sync_file: Option<PathBuf>,
    /// Serializes sync-mode batches so the file never goes backwards and
    /// no batch is merged into a copy that is already stale.
    file_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new(store: MetricStore) -> Self {
        Self {
            store,
            sync_file: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Persist the whole store to `path` after each applied batch.
    pub fn with_sync_file(mut self, path: PathBuf) -> Self {
        self.sync_file = Some(path);
        self
    }

    /// The underlying store, for snapshotters and tests.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Load a snapshot file into the store.
    ///
    /// Returns the number of metrics restored; a missing or empty file
    /// restores nothing and leaves the store as it is.
    pub fn restore_from(&self, path: &Path) -> BackendResult<usize> {
        match snapshot::read_file(path)? {
            Some(snap) => {
                let count = snap.len();
                self.store.restore(snap);
                info!(?path, metrics = count, "store restored from snapshot");
                Ok(count)
            }
            None => Ok(0),
        }
    }

    fn merge_all(&self, updates: &[Update]) -> Vec<MetricValue> {
        let mut writer = self.store.write();
        updates.iter().map(|u| writer.apply(u)).collect()
    }

    /// Merge into a copy, persist the copy, then publish it.
    ///
    /// A failed write leaves both the store and the file untouched.
    async fn merge_and_sync(
        &self,
        path: PathBuf,
        updates: &[Update],
    ) -> BackendResult<Vec<MetricValue>> {
        let _file = self.file_lock.lock().await;
        let mut next = self.store.all();
        let merged: Vec<_> = updates.iter().map(|u| next.apply(u)).collect();

        let next = tokio::task::spawn_blocking(move || {
            snapshot::write_file(&path, &next).map(|()| next)
        })
        .await
        .map_err(|e| BackendError::SnapshotWrite(e.to_string()))??;

        self.store.write().replace(next);
        Ok(merged)
    }
}

impl MetricsBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn apply<'a>(&'a self, updates: &'a [Update]) -> BackendFuture<'a, Vec<MetricValue>> {
        Box::pin(async move {
            let Some(path) = self.sync_file.clone() else {
                let merged = self.merge_all(updates);
                debug!(updates = updates.len(), "batch merged");
                return Ok(merged);
            };

            let merged = self.merge_and_sync(path, updates).await?;
            debug!(updates = updates.len(), "batch merged and synced to file");
            Ok(merged)
        })
    }

    fn gauge<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<f64>> {
        Box::pin(async move { Ok(self.store.gauge(name)) })
    }

    fn counter<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<i64>> {
        Box::pin(async move { Ok(self.store.counter(name)) })
    }

    fn snapshot(&self) -> BackendFuture<'_, Snapshot> {
        Box::pin(async move { Ok(self.store.all()) })
    }

    fn ping(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn gauge(name: &str, value: f64) -> Update {
        Update::Gauge {
            name: name.to_string(),
            value,
        }
    }

    fn counter(name: &str, delta: i64) -> Update {
        Update::Counter {
            name: name.to_string(),
            delta,
        }
    }

    #[tokio::test]
    async fn gauges_overwrite_counters_add() {
        let backend = MemoryBackend::new(MetricStore::new());
        backend
            .apply(&[gauge("Alloc", 100.0), counter("PollCount", 1)])
            .await
            .unwrap();
        backend
            .apply(&[gauge("Alloc", 250.5), counter("PollCount", 2)])
            .await
            .unwrap();

        assert_eq!(backend.gauge("Alloc").await.unwrap(), Some(250.5));
        assert_eq!(backend.counter("PollCount").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn apply_returns_merged_values_in_order() {
        let backend = MemoryBackend::new(MetricStore::new());
        let merged = backend
            .apply(&[counter("PollCount", 2), gauge("Alloc", 1.5), counter("PollCount", 3)])
            .await
            .unwrap();
        assert_eq!(
            merged,
            vec![
                MetricValue::Counter(2),
                MetricValue::Gauge(1.5),
                MetricValue::Counter(5),
            ]
        );
    }

    #[tokio::test]
    async fn counter_addition_wraps() {
        let backend = MemoryBackend::new(MetricStore::new());
        backend
            .apply(&[counter("c", i64::MAX), counter("c", 1)])
            .await
            .unwrap();
        assert_eq!(backend.counter("c").await.unwrap(), Some(i64::MIN));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_counter_updates_lose_nothing() {
        let backend = Arc::new(MemoryBackend::new(MetricStore::new()));
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.apply(&[counter("hits", 1)]).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(backend.counter("hits").await.unwrap(), Some(64));
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        let backend = MemoryBackend::new(MetricStore::new());
        backend.ping().await.unwrap();
    }

    #[tokio::test]
    async fn sync_file_is_rewritten_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let backend = MemoryBackend::new(MetricStore::new()).with_sync_file(path.clone());

        backend.apply(&[counter("PollCount", 1)]).await.unwrap();
        backend.apply(&[counter("PollCount", 1)]).await.unwrap();

        let on_disk = snapshot::read_file(&path).unwrap().unwrap();
        assert_eq!(on_disk.counters["PollCount"], 2);
    }

    #[tokio::test]
    async fn failed_sync_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let backend =
            MemoryBackend::new(MetricStore::new()).with_sync_file(blocker.join("metrics.json"));

        assert!(backend.apply(&[counter("PollCount", 1)]).await.is_err());
        assert!(backend.apply(&[counter("PollCount", 1)]).await.is_err());

        assert_eq!(backend.counter("PollCount").await.unwrap(), None);
        assert!(backend.store().all().is_empty());
    }

    #[test]
    fn restore_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let mut snap = Snapshot::default();
        snap.gauges.insert("Alloc".to_string(), 53.23);
        snap.counters.insert("PollCount".to_string(), 10);
        snapshot::write_file(&path, &snap).unwrap();

        let backend = MemoryBackend::new(MetricStore::new());
        assert_eq!(backend.restore_from(&path).unwrap(), 2);
        assert_eq!(backend.store().all(), snap);
    }

    #[test]
    fn restore_from_missing_file_keeps_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(MetricStore::new());
        assert_eq!(backend.restore_from(&dir.path().join("none.json")).unwrap(), 0);
        assert!(backend.store().all().is_empty());
    }
}
