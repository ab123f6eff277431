//! Agent mode — samples this host and reports to a collector.
//!
//! In this mode, the daemon:
//! 1. Starts the sampler, publishing readings every poll interval
//! 2. Starts the reporter, posting the latest readings every report interval
//! 3. On Ctrl-C, stops both loops

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use statkeep_agent::{Readings, Reporter, Sampler, run_reporter, run_sampler};
use statkeep_sign::Signer;

use crate::config::AgentConfig;

pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(collector = %config.address, "statkeep agent starting");

    let signer = Signer::from_key(config.key.as_deref());
    if signer.is_some() {
        info!("samples will be signed");
    }
    let reporter = Reporter::new(&config.address, signer, config.report_timeout);

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (readings_tx, readings_rx) = watch::channel(Readings::default());

    // ── Sampler ──────────────────────────────────────────────────
    let sampler_handle = tokio::spawn(run_sampler(
        Sampler::new(),
        config.poll_interval,
        readings_tx,
        shutdown_rx.clone(),
    ));

    // ── Reporter ─────────────────────────────────────────────────
    let reporter_handle = tokio::spawn(run_reporter(
        reporter,
        config.report_interval,
        readings_rx,
        shutdown_rx,
    ));

    // ── Wait for shutdown ────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = sampler_handle.await;
    let _ = reporter_handle.await;

    info!("statkeep agent stopped");
    Ok(())
}
