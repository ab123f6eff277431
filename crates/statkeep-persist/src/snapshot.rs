//! JSON file snapshots of the metric store.
//!
//! The whole store is written as one document and replaces the previous
//! file via a rename, so a concurrent reader sees either the old or the
//! new snapshot, never a partial one.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use statkeep_state::{MetricStore, Snapshot};

use crate::error::{BackendError, BackendResult};

/// Convert any `Display` error into a `BackendError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident, $path:expr) => {
        |e| BackendError::$variant(format!("{}: {}", $path.display(), e))
    };
}

/// Read a snapshot file.
///
/// A missing or empty file yields `None`: there is nothing to restore.
pub fn read_file(path: &Path) -> BackendResult<Option<Snapshot>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no snapshot file to restore");
            return Ok(None);
        }
        Err(e) => return Err(BackendError::SnapshotRead(format!("{}: {e}", path.display()))),
    };
    if content.trim().is_empty() {
        debug!(?path, "snapshot file is empty");
        return Ok(None);
    }
    let snapshot = serde_json::from_str(&content).map_err(map_err!(SnapshotRead, path))?;
    Ok(Some(snapshot))
}

/// Write `snapshot` to `path`, replacing any previous contents.
pub fn write_file(path: &Path, snapshot: &Snapshot) -> BackendResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(map_err!(SnapshotWrite, parent))?;
    }
    let tmp = temp_path(path);
    let bytes = serde_json::to_vec(snapshot).map_err(map_err!(SnapshotWrite, path))?;
    fs::write(&tmp, bytes).map_err(map_err!(SnapshotWrite, tmp))?;
    fs::rename(&tmp, path).map_err(map_err!(SnapshotWrite, path))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Periodically writes the store to a snapshot file.
pub struct FileSnapshotter {
    store: MetricStore,
    path: PathBuf,
    interval: Duration,
}

impl FileSnapshotter {
    pub fn new(store: MetricStore, path: PathBuf, interval: Duration) -> Self {
        Self {
            store,
            path,
            interval,
        }
    }

    /// Write the current store contents once.
    pub async fn snapshot(&self) -> BackendResult<usize> {
        let snapshot = self.store.all();
        let count = snapshot.len();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_file(&path, &snapshot))
            .await
            .map_err(|e| BackendError::SnapshotWrite(e.to_string()))??;
        debug!(metrics = count, path = ?self.path, "store snapshot written");
        Ok(count)
    }

    /// Run the snapshot loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            path = ?self.path,
            "file snapshotter started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.snapshot().await {
                        error!(error = %e, "store snapshot failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("file snapshotter shutting down");
                    // Final snapshot before exit.
                    if let Err(e) = self.snapshot().await {
                        error!(error = %e, "final store snapshot failed");
                    }
                    break;
                }
            }
        }
    }
}
