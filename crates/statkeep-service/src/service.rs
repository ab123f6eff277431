//! UpdateService — validates input and drives the backend.
//!
//! Parsing and validation happen here, merging happens in the backend.
//! Batches are validated in full before anything is applied, and the
//! backend applies a batch atomically, so a batch lands entirely or not
//! at all.

use std::sync::Arc;

use tracing::debug;

use statkeep_persist::MetricsBackend;
use statkeep_state::{MetricKind, MetricValue, Sample, Snapshot, Update};

use crate::error::{UpdateError, UpdateResult};

/// Shared handle to the update and query operations.
#[derive(Clone)]
pub struct UpdateService {
    backend: Arc<dyn MetricsBackend>,
}

impl UpdateService {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Apply one update given as raw strings.
    ///
    /// `kind` is matched case-insensitively; gauges parse as `f64`,
    /// counters as `i64`.
    pub async fn update(&self, kind: &str, name: &str, raw: &str) -> UpdateResult<()> {
        let kind: MetricKind = kind.parse()?;
        let update = Update::parse(kind, name, raw)?;
        self.backend.apply(std::slice::from_ref(&update)).await?;
        debug!(%kind, %name, "metric updated");
        Ok(())
    }

    /// Apply one JSON sample and return the value it left behind.
    ///
    /// The value comes from the same backend operation that merged the
    /// sample, not from a later read another writer could race.
    pub async fn update_sample(&self, sample: &Sample) -> UpdateResult<MetricValue> {
        let update = Update::try_from(sample)?;
        let merged = self.backend.apply(std::slice::from_ref(&update)).await?;
        debug!(kind = %sample.kind, name = %sample.id, "metric updated");
        match merged.last() {
            Some(value) => Ok(*value),
            None => self.get(sample.kind, &sample.id).await,
        }
    }

    /// Apply a batch of samples, all or nothing.
    ///
    /// The first invalid sample rejects the whole batch before any of it
    /// is applied. Returns the number of samples applied.
    pub async fn update_batch(&self, samples: &[Sample]) -> UpdateResult<usize> {
        let updates = samples
            .iter()
            .map(Update::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if updates.is_empty() {
            return Ok(0);
        }
        self.backend.apply(&updates).await?;
        debug!(count = updates.len(), "metric batch applied");
        Ok(updates.len())
    }

    /// Current value of a metric, or `NotFound` if it was never written.
    pub async fn get(&self, kind: MetricKind, name: &str) -> UpdateResult<MetricValue> {
        match kind {
            MetricKind::Gauge => self.gauge(name).await.map(MetricValue::Gauge),
            MetricKind::Counter => self.counter(name).await.map(MetricValue::Counter),
        }
    }

    pub async fn gauge(&self, name: &str) -> UpdateResult<f64> {
        self.backend
            .gauge(name)
            .await?
            .ok_or_else(|| not_found(MetricKind::Gauge, name))
    }

    pub async fn counter(&self, name: &str) -> UpdateResult<i64> {
        self.backend
            .counter(name)
            .await?
            .ok_or_else(|| not_found(MetricKind::Counter, name))
    }

    /// Every gauge and counter currently stored.
    pub async fn snapshot(&self) -> UpdateResult<Snapshot> {
        Ok(self.backend.snapshot().await?)
    }

    /// Check the backend is reachable.
    pub async fn ping(&self) -> UpdateResult<()> {
        Ok(self.backend.ping().await?)
    }
}

fn not_found(kind: MetricKind, name: &str) -> UpdateError {
    UpdateError::NotFound {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statkeep_persist::{BackendError, BackendFuture, MemoryBackend};
    use statkeep_state::MetricStore;

    fn memory_service() -> (UpdateService, MetricStore) {
        let store = MetricStore::new();
        let backend = Arc::new(MemoryBackend::new(store.clone()));
        (UpdateService::new(backend), store)
    }

    /// Backend whose every call fails as unreachable.
    struct DownBackend;

    impl MetricsBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        fn apply<'a>(&'a self, _: &'a [Update]) -> BackendFuture<'a, Vec<MetricValue>> {
            Box::pin(async { Err(BackendError::Connection("refused".to_string())) })
        }
        fn gauge<'a>(&'a self, _: &'a str) -> BackendFuture<'a, Option<f64>> {
            Box::pin(async { Err(BackendError::Connection("refused".to_string())) })
        }
        fn counter<'a>(&'a self, _: &'a str) -> BackendFuture<'a, Option<i64>> {
            Box::pin(async { Err(BackendError::Connection("refused".to_string())) })
        }
        fn snapshot(&self) -> BackendFuture<'_, Snapshot> {
            Box::pin(async { Err(BackendError::Connection("refused".to_string())) })
        }
        fn ping(&self) -> BackendFuture<'_, ()> {
            Box::pin(async { Err(BackendError::Connection("refused".to_string())) })
        }
    }

    /// Backend whose reads lag behind its writes, as when another writer
    /// lands between the merge and a follow-up read.
    struct LaggingReads;

    impl MetricsBackend for LaggingReads {
        fn name(&self) -> &'static str {
            "lagging"
        }
        fn apply<'a>(&'a self, _: &'a [Update]) -> BackendFuture<'a, Vec<MetricValue>> {
            Box::pin(async { Ok(vec![MetricValue::Counter(7)]) })
        }
        fn gauge<'a>(&'a self, _: &'a str) -> BackendFuture<'a, Option<f64>> {
            Box::pin(async { Ok(Some(0.0)) })
        }
        fn counter<'a>(&'a self, _: &'a str) -> BackendFuture<'a, Option<i64>> {
            Box::pin(async { Ok(Some(100)) })
        }
        fn snapshot(&self) -> BackendFuture<'_, Snapshot> {
            Box::pin(async { Ok(Snapshot::default()) })
        }
        fn ping(&self) -> BackendFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn update_accepts_valid_values() {
        let (svc, _) = memory_service();
        for (kind, name, value) in [
            ("gauge", "TotalMemory", "65.34"),
            ("counter", "PollCounter", "62"),
            ("GAUGE", "Upper", "1"),
            ("Counter", "Mixed", "-4"),
        ] {
            svc.update(kind, name, value).await.unwrap();
        }
    }

    #[tokio::test]
    async fn counter_accumulates_from_absent() {
        let (svc, _) = memory_service();
        for _ in 0..3 {
            svc.update("counter", "PollCount", "1").await.unwrap();
        }
        assert_eq!(
            svc.get(MetricKind::Counter, "PollCount").await.unwrap(),
            MetricValue::Counter(3)
        );
    }

    #[tokio::test]
    async fn gauge_last_write_wins() {
        let (svc, _) = memory_service();
        svc.update("gauge", "Alloc", "100.0").await.unwrap();
        svc.update("gauge", "Alloc", "250.5").await.unwrap();
        assert_eq!(svc.gauge("Alloc").await.unwrap(), 250.5);
    }

    #[tokio::test]
    async fn unsupported_type_is_distinct_from_malformed_value() {
        let (svc, _) = memory_service();

        let err = svc.update("histogram", "X", "1.0").await.unwrap_err();
        assert!(matches!(err, UpdateError::UnsupportedType(ref k) if k == "histogram"));

        let err = svc.update("gauge", "X", "abc").await.unwrap_err();
        assert!(matches!(err, UpdateError::MalformedValue { .. }));

        let err = svc.update("counter", "X", "63.243").await.unwrap_err();
        assert!(matches!(err, UpdateError::MalformedValue { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn rejected_update_changes_nothing() {
        let (svc, store) = memory_service();
        let _ = svc.update("gauge", "X", "65 + 23i").await;
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn get_never_set_is_not_found() {
        let (svc, _) = memory_service();
        let err = svc.get(MetricKind::Counter, "NeverSet").await.unwrap_err();
        assert!(matches!(err, UpdateError::NotFound { kind: MetricKind::Counter, .. }));
    }

    #[tokio::test]
    async fn gauge_and_counter_namespaces_are_separate() {
        let (svc, _) = memory_service();
        svc.update("gauge", "X", "1.5").await.unwrap();
        assert!(svc.counter("X").await.is_err());
    }

    #[tokio::test]
    async fn update_sample_returns_merged_value() {
        let (svc, _) = memory_service();
        svc.update_sample(&Sample::counter("PollCount", 5)).await.unwrap();
        let merged = svc.update_sample(&Sample::counter("PollCount", 2)).await.unwrap();
        assert_eq!(merged, MetricValue::Counter(7));
    }

    #[tokio::test]
    async fn update_sample_echoes_the_value_it_merged() {
        let svc = UpdateService::new(Arc::new(LaggingReads));
        let merged = svc.update_sample(&Sample::counter("PollCount", 2)).await.unwrap();
        assert_eq!(merged, MetricValue::Counter(7));
    }

    #[tokio::test]
    async fn batch_applies_every_sample() {
        let (svc, _) = memory_service();
        let batch = vec![
            Sample::gauge("Alloc", 1.0),
            Sample::counter("PollCount", 2),
            Sample::counter("PollCount", 3),
        ];
        assert_eq!(svc.update_batch(&batch).await.unwrap(), 3);
        assert_eq!(svc.counter("PollCount").await.unwrap(), 5);
        assert_eq!(svc.gauge("Alloc").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn invalid_sample_rejects_whole_batch() {
        let (svc, store) = memory_service();
        let mut broken = Sample::gauge("Broken", 1.0);
        broken.value = None;
        let batch = vec![Sample::counter("PollCount", 1), broken];

        let err = svc.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, UpdateError::MalformedValue { .. }));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (svc, _) = memory_service();
        assert_eq!(svc.update_batch(&[]).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_increments_are_not_lost() {
        let (svc, _) = memory_service();
        let a = tokio::spawn({
            let svc = svc.clone();
            async move { svc.update("counter", "hits", "1").await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            async move { svc.update("counter", "hits", "1").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(svc.counter("hits").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn snapshot_reflects_store() {
        let (svc, store) = memory_service();
        store.save_gauge("Alloc", 43.53234);
        store.save_counter("Counter", 5);
        assert_eq!(svc.snapshot().await.unwrap(), store.all());
    }

    #[tokio::test]
    async fn ping_on_memory_backend_succeeds() {
        let (svc, _) = memory_service();
        svc.ping().await.unwrap();
        assert_eq!(svc.backend_name(), "memory");
    }

    #[tokio::test]
    async fn backend_outage_is_not_a_client_error() {
        let svc = UpdateService::new(Arc::new(DownBackend));
        let err = svc.ping().await.unwrap_err();
        assert!(!err.is_client_error());
        assert!(matches!(err, UpdateError::Backend(BackendError::Connection(_))));

        let err = svc.update("gauge", "Alloc", "1").await.unwrap_err();
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn snapshot_file_round_trip_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = MetricStore::new();
        let backend = Arc::new(MemoryBackend::new(store.clone()).with_sync_file(path.clone()));
        let svc = UpdateService::new(backend);
        svc.update("gauge", "Alloc", "53.23").await.unwrap();
        svc.update("counter", "PollCount", "10").await.unwrap();

        let restored = MemoryBackend::new(MetricStore::new());
        restored.restore_from(&path).unwrap();
        assert_eq!(restored.store().all(), store.all());
    }
}
