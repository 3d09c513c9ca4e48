//! Resource monitoring for the daemon and its browser worker.
//!
//! The browser is what runs the host out of memory, so the sample covers
//! both the daemon and every process matching the reaper's names:
//! - Periodic logging of resident memory
//! - A warning when the combined total crosses the configured threshold
//! - The latest sample published for `/health`
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Missing processes read as zero

use std::process;

use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wagate_protocol::MemoryUsage;

use crate::config::MonitorConfig;
use crate::reaper::matching_processes;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Samples resident memory with `sysinfo`.
pub struct ResourceMonitor {
    system: System,
    pid: Pid,
    worker_names: Vec<String>,
    memory_warn_mb: u64,
}

impl ResourceMonitor {
    pub fn new(worker_names: Vec<String>, memory_warn_mb: u64) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
            worker_names,
            memory_warn_mb,
        }
    }

    /// Refreshes process information and returns the current usage.
    pub fn sample(&mut self) -> MemoryUsage {
        self.system.refresh_all();

        let daemon_bytes = self
            .system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0);

        let (worker_bytes, worker_processes) = matching_processes(&self.system, &self.worker_names)
            .fold((0u64, 0usize), |(bytes, count), (_, proc_)| {
                (bytes.saturating_add(proc_.memory()), count + 1)
            });

        MemoryUsage {
            daemon_mb: daemon_bytes / BYTES_PER_MB,
            worker_mb: worker_bytes / BYTES_PER_MB,
            worker_processes,
        }
    }

    pub fn is_high(&self, usage: &MemoryUsage) -> bool {
        usage.daemon_mb.saturating_add(usage.worker_mb) > self.memory_warn_mb
    }

    pub fn memory_warn_mb(&self) -> u64 {
        self.memory_warn_mb
    }
}

/// Spawns the sampling task.
///
/// Returns a receiver holding the latest sample (`None` until the first
/// tick) and the task handle. Stops when `cancel_token` is cancelled.
pub fn spawn_monitor_task(
    config: &MonitorConfig,
    worker_names: Vec<String>,
    cancel_token: CancellationToken,
) -> (watch::Receiver<Option<MemoryUsage>>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);
    let period = config.interval;
    let mut monitor = ResourceMonitor::new(worker_names, config.memory_warn_mb);

    let task = tokio::spawn(async move {
        let mut tick = interval(period);

        info!(
            memory_warn_mb = monitor.memory_warn_mb(),
            interval_secs = period.as_secs(),
            "Resource monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Resource monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let usage = monitor.sample();
                    log_usage(&usage, &monitor);
                    tx.send_replace(Some(usage));
                }
            }
        }

        debug!("Resource monitor task completed");
    });

    (rx, task)
}

fn log_usage(usage: &MemoryUsage, monitor: &ResourceMonitor) {
    if monitor.is_high(usage) {
        warn!(
            daemon_mb = usage.daemon_mb,
            worker_mb = usage.worker_mb,
            worker_processes = usage.worker_processes,
            threshold_mb = monitor.memory_warn_mb(),
            "HIGH MEMORY: browser session may be killed by the host"
        );
    } else {
        debug!(
            daemon_mb = usage.daemon_mb,
            worker_mb = usage.worker_mb,
            worker_processes = usage.worker_processes,
            "Resource usage"
        );
    }
}
