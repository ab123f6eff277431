//! Sampler — collects host and process readings.
//!
//! Readings are published whole on a `watch` channel; the reporter only
//! ever sees the most recent set.

use std::time::Duration;

use rand::Rng;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use statkeep_state::Sample;

/// One sampling cycle's worth of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub total_memory: u64,
    pub free_memory: u64,
    pub used_memory: u64,
    pub available_memory: u64,
    /// Utilization percentage per logical CPU.
    pub cpu_utilization: Vec<f32>,
    pub process_resident_memory: u64,
    pub process_virtual_memory: u64,
    pub random_value: f64,
    /// Polls taken since the agent started.
    pub poll_count: u64,
}

impl Readings {
    /// The samples reported for these readings.
    ///
    /// `poll_delta` is sent as the `PollCount` counter increment.
    pub fn to_samples(&self, poll_delta: i64) -> Vec<Sample> {
        let mut samples = vec![
            Sample::gauge("TotalMemory", self.total_memory as f64),
            Sample::gauge("FreeMemory", self.free_memory as f64),
            Sample::gauge("UsedMemory", self.used_memory as f64),
            Sample::gauge("AvailableMemory", self.available_memory as f64),
            Sample::gauge("ProcessResidentMemory", self.process_resident_memory as f64),
            Sample::gauge("ProcessVirtualMemory", self.process_virtual_memory as f64),
            Sample::gauge("RandomValue", self.random_value),
        ];
        samples.extend(
            self.cpu_utilization
                .iter()
                .enumerate()
                .map(|(i, usage)| Sample::gauge(format!("CPUutilization{}", i + 1), f64::from(*usage))),
        );
        samples.push(Sample::counter("PollCount", poll_delta));
        samples
    }
}

/// Reads memory, CPU and process figures through `sysinfo`.
pub struct Sampler {
    system: System,
    pid: Option<Pid>,
    polls: u64,
}

impl Sampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_processes(ProcessRefreshKind::nothing().with_memory()),
        );
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "process metrics unavailable");
                None
            }
        };
        Self {
            system,
            pid,
            polls: 0,
        }
    }

    /// Refresh everything and return the new readings.
    ///
    /// CPU utilization is measured between consecutive calls, so the very
    /// first reading may be zero.
    pub fn sample(&mut self) -> Readings {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        self.polls += 1;

        let (resident, virtual_mem) = match self.pid {
            Some(pid) => {
                self.system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                self.system
                    .process(pid)
                    .map_or((0, 0), |p| (p.memory(), p.virtual_memory()))
            }
            None => (0, 0),
        };

        Readings {
            total_memory: self.system.total_memory(),
            free_memory: self.system.free_memory(),
            used_memory: self.system.used_memory(),
            available_memory: self.system.available_memory(),
            cpu_utilization: self.system.cpus().iter().map(|c| c.cpu_usage()).collect(),
            process_resident_memory: resident,
            process_virtual_memory: virtual_mem,
            random_value: rand::thread_rng().r#gen::<f64>(),
            poll_count: self.polls,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample every `interval` and publish on `tx` until shutdown.
pub async fn run_sampler(
    mut sampler: Sampler,
    interval: Duration,
    tx: watch::Sender<Readings>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "sampler started");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let readings = sampler.sample();
                debug!(poll_count = readings.poll_count, "readings refreshed");
                tx.send_replace(readings);
            }
            _ = shutdown.changed() => {
                info!("sampler shutting down");
                break;
            }
        }
    }
}
