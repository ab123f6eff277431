//! Postgres backend — every batch is written through immediately.
//!
//! Gauges upsert by name; counters upsert with addition in the same
//! statement, so concurrent writers never race on a read-then-write.
//! Rows are touched in `(kind, name)` order within a transaction so two
//! overlapping batches always take their row locks in the same order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use statkeep_state::{MetricValue, Snapshot, Update};

use crate::backend::{BackendFuture, MetricsBackend};
use crate::error::{BackendError, BackendResult};

const CREATE_GAUGES: &str = "CREATE TABLE IF NOT EXISTS gauges (
    id TEXT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL
)";

const CREATE_COUNTERS: &str = "CREATE TABLE IF NOT EXISTS counters (
    id TEXT PRIMARY KEY,
    value BIGINT NOT NULL
)";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (id, value) VALUES ($1, $2)
    ON CONFLICT (id) DO UPDATE SET value = EXCLUDED.value
    RETURNING value";

// Addition wraps at the i64 boundary like the in-memory store; plain
// BIGINT addition would raise an out-of-range error instead.
const UPSERT_COUNTER: &str = "INSERT INTO counters (id, value) VALUES ($1, $2)
    ON CONFLICT (id) DO UPDATE SET value = (
        ((counters.value::NUMERIC + EXCLUDED.value + 9223372036854775808)
            % 18446744073709551616 + 18446744073709551616)
        % 18446744073709551616 - 9223372036854775808
    )::BIGINT
    RETURNING value";

/// Map a sqlx error onto connection vs. query failures.
fn classify(e: sqlx::Error) -> BackendError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => BackendError::Connection(e.to_string()),
        other => BackendError::Query(other.to_string()),
    }
}

/// Indices of `updates` sorted by `(kind, name)`.
///
/// The sort is stable, so repeated names keep their request order.
fn lock_order(updates: &[Update]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..updates.len()).collect();
    order.sort_by_key(|&i| (updates[i].kind(), updates[i].name()));
    order
}

/// Backend storing metrics in two Postgres tables.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    /// Set once both tables are known to exist.
    schema: Arc<OnceCell<()>>,
}

impl PostgresBackend {
    /// Connect eagerly; fails if the database cannot be reached.
    pub async fn connect(dsn: &str) -> BackendResult<Self> {
        let pool = Self::pool_options()
            .connect(dsn)
            .await
            .map_err(classify)?;
        info!("postgres backend connected");
        Ok(Self::with_pool(pool))
    }

    /// Build the pool without connecting; connections open on first use.
    ///
    /// Lets the server start while the database is down, with `ping`
    /// reporting the outage.
    pub fn connect_lazy(dsn: &str) -> BackendResult<Self> {
        let pool = Self::pool_options()
            .connect_lazy(dsn)
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self::with_pool(pool))
    }

    fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        }
    }

    fn pool_options() -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
    }

    /// Create the gauge and counter tables if they don't exist yet.
    ///
    /// Every query path calls this first; the DDL is retried until it
    /// succeeds once.
    pub async fn ensure_schema(&self) -> BackendResult<()> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(CREATE_GAUGES)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
                sqlx::query(CREATE_COUNTERS)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
                debug!("postgres schema ensured");
                Ok::<_, BackendError>(())
            })
            .await?;
        Ok(())
    }

    async fn apply_batch(&self, updates: &[Update]) -> BackendResult<Vec<MetricValue>> {
        self.ensure_schema().await?;
        let mut merged: Vec<Option<MetricValue>> = vec![None; updates.len()];
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for i in lock_order(updates) {
            let stored = match &updates[i] {
                Update::Gauge { name, value } => {
                    let v: f64 = sqlx::query_scalar(UPSERT_GAUGE)
                        .bind(name)
                        .bind(value)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(classify)?;
                    MetricValue::Gauge(v)
                }
                Update::Counter { name, delta } => {
                    let v: i64 = sqlx::query_scalar(UPSERT_COUNTER)
                        .bind(name)
                        .bind(delta)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(classify)?;
                    MetricValue::Counter(v)
                }
            };
            merged[i] = Some(stored);
        }
        tx.commit().await.map_err(classify)?;
        debug!(updates = updates.len(), "batch committed");
        Ok(merged.into_iter().flatten().collect())
    }

    async fn load_all(&self) -> BackendResult<Snapshot> {
        self.ensure_schema().await?;
        let gauges: Vec<(String, f64)> = sqlx::query_as("SELECT id, value FROM gauges")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        let counters: Vec<(String, i64)> = sqlx::query_as("SELECT id, value FROM counters")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(Snapshot {
            gauges: gauges.into_iter().collect::<BTreeMap<_, _>>(),
            counters: counters.into_iter().collect::<BTreeMap<_, _>>(),
        })
    }
}

impl MetricsBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn apply<'a>(&'a self, updates: &'a [Update]) -> BackendFuture<'a, Vec<MetricValue>> {
        Box::pin(self.apply_batch(updates))
    }

    fn gauge<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<f64>> {
        Box::pin(async move {
            self.ensure_schema().await?;
            sqlx::query_scalar("SELECT value FROM gauges WHERE id = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)
        })
    }

    fn counter<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<i64>> {
        Box::pin(async move {
            self.ensure_schema().await?;
            sqlx::query_scalar("SELECT value FROM counters WHERE id = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)
        })
    }

    fn snapshot(&self) -> BackendFuture<'_, Snapshot> {
        Box::pin(self.load_all())
    }

    fn ping(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| BackendError::Connection(e.to_string()))
        })
    }
}
