//! Server mode — the metrics collector.
//!
//! Startup sequence:
//! 1. Pick the backend: Postgres when a DSN is configured, otherwise the
//!    in-memory store, restored from the snapshot file if asked to
//! 2. Start the file snapshotter (memory backend with a non-zero interval)
//! 3. Serve the HTTP API until Ctrl-C, drain in-flight requests, then
//!    write a final snapshot

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use statkeep_api::{ApiState, build_router};
use statkeep_persist::{FileSnapshotter, MemoryBackend, MetricsBackend, PostgresBackend};
use statkeep_service::UpdateService;
use statkeep_sign::Signer;
use statkeep_state::MetricStore;

use crate::config::ServerConfig;

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(address = %config.address, "statkeep collector starting");

    let (backend, snapshotter) = build_backend(&config).await?;
    let service = UpdateService::new(backend);
    let signer = Signer::from_key(config.key.as_deref());
    if signer.is_some() {
        info!("sample signatures required");
    }

    let router = build_router(ApiState { service, signer });
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    serve(listener, router, snapshotter, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    })
    .await?;

    info!("statkeep collector stopped");
    Ok(())
}

/// Serve `router` until `signal` resolves and every in-flight request
/// has finished, then stop the snapshotter.
///
/// The snapshotter's final write runs after the drain, so it holds every
/// update the server acknowledged.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    snapshotter: Option<FileSnapshotter>,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let snapshot_handle = snapshotter
        .map(|snapshotter| tokio::spawn(async move { snapshotter.run(shutdown_rx).await }));

    // ── API server ─────────────────────────────────────────────

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await;

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    if let Some(handle) = snapshot_handle {
        let _ = handle.await;
    }
    served.context("serving API")
}

/// Choose and prepare the backend for `config`.
///
/// Returns the snapshotter to run alongside when the memory backend
/// persists on an interval.
pub async fn build_backend(
    config: &ServerConfig,
) -> anyhow::Result<(Arc<dyn MetricsBackend>, Option<FileSnapshotter>)> {
    if let Some(dsn) = &config.database_dsn {
        let backend = PostgresBackend::connect_lazy(dsn).context("configuring postgres pool")?;
        if let Err(e) = backend.ensure_schema().await {
            warn!(error = %e, "database unreachable at startup, tables will be created on first use");
        }
        info!("using postgres backend");
        return Ok((Arc::new(backend), None));
    }

    let store = MetricStore::new();
    let mut backend = MemoryBackend::new(store.clone());
    if config.restore {
        backend
            .restore_from(&config.store_file)
            .with_context(|| format!("restoring {}", config.store_file.display()))?;
    }

    let snapshotter = if config.store_interval.is_zero() {
        info!(path = ?config.store_file, "using memory backend, synced to file on every update");
        backend = backend.with_sync_file(config.store_file.clone());
        None
    } else {
        info!(path = ?config.store_file, "using memory backend with periodic snapshots");
        Some(FileSnapshotter::new(
            store,
            config.store_file.clone(),
            config.store_interval,
        ))
    };

    Ok((Arc::new(backend), snapshotter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use statkeep_persist::snapshot;
    use statkeep_state::{Snapshot, Update};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn memory_config(store_file: &Path) -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".to_string(),
            store_interval: Duration::from_secs(300),
            store_file: store_file.to_path_buf(),
            restore: true,
            database_dsn: None,
            key: None,
        }
    }

    fn saved_snapshot(path: &Path) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.counters.insert("PollCount".to_string(), 10);
        snapshot::write_file(path, &snap).unwrap();
        snap
    }

    #[tokio::test]
    async fn memory_backend_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let snap = saved_snapshot(&path);

        let (backend, snapshotter) = build_backend(&memory_config(&path)).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.snapshot().await.unwrap(), snap);
        assert!(snapshotter.is_some());
    }

    #[tokio::test]
    async fn restore_disabled_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        saved_snapshot(&path);

        let mut config = memory_config(&path);
        config.restore = false;
        let (backend, _) = build_backend(&config).await.unwrap();
        assert!(backend.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(build_backend(&memory_config(&path)).await.is_err());
    }

    #[tokio::test]
    async fn zero_interval_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let mut config = memory_config(&path);
        config.store_interval = Duration::ZERO;

        let (backend, snapshotter) = build_backend(&config).await.unwrap();
        assert!(snapshotter.is_none());

        backend
            .apply(&[Update::Gauge {
                name: "Alloc".to_string(),
                value: 1.5,
            }])
            .await
            .unwrap();
        let on_disk = snapshot::read_file(&path).unwrap().unwrap();
        assert_eq!(on_disk.gauges["Alloc"], 1.5);
    }

    #[tokio::test]
    async fn dsn_selects_postgres_even_when_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config(&dir.path().join("metrics.json"));
        config.database_dsn = Some("postgres://statkeep@127.0.0.1:1/statkeep".to_string());

        let (backend, snapshotter) = build_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "postgres");
        assert!(snapshotter.is_none());
        assert!(backend.ping().await.is_err());
    }

    #[tokio::test]
    async fn final_snapshot_holds_requests_in_flight_at_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let mut config = memory_config(&path);
        config.store_interval = Duration::from_secs(3600);

        let (backend, snapshotter) = build_backend(&config).await.unwrap();
        let router = build_router(ApiState {
            service: UpdateService::new(backend),
            signer: None,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router, snapshotter, async {
            let _ = stop_rx.await;
        }));

        // Send the head and half the body, so the handler is still
        // waiting on the request when shutdown starts.
        let body = br#"{"id":"PollCount","type":"counter","delta":5}"#;
        let (first, rest) = body.split_at(10);
        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "POST /update/ HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        conn.write_all(head.as_bytes()).await.unwrap();
        conn.write_all(first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        conn.write_all(rest).await.unwrap();

        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got {response}");

        server.await.unwrap().unwrap();
        let on_disk = snapshot::read_file(&path).unwrap().unwrap();
        assert_eq!(on_disk.counters["PollCount"], 5);
    }
}
