//! Best-effort termination of orphaned browser processes.
//!
//! A crashed worker can leave its browser running, holding hundreds of
//! megabytes the next attempt needs. Before each attempt and before a forced
//! reconnect every process whose name contains one of the configured
//! substrings is killed. Nothing here can fail the caller: enumeration runs
//! on the blocking pool under a timeout, and kill failures are only logged.

use std::ffi::OsStr;
use std::process;
use std::time::Duration;

use sysinfo::{Pid, Process, System};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::ReaperConfig;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub matched: usize,
    pub killed: usize,
}

/// Kills orphaned worker processes by name.
#[derive(Debug, Clone)]
pub struct Reaper {
    enabled: bool,
    process_names: Vec<String>,
    timeout: Duration,
}

impl Reaper {
    pub fn new(config: &ReaperConfig, enabled: bool) -> Self {
        Self {
            enabled,
            process_names: config.process_names.clone(),
            timeout: config.timeout,
        }
    }

    /// A reaper that never touches any process.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            process_names: Vec::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.process_names.is_empty()
    }

    /// Runs one sweep. Never fails and never blocks past the timeout.
    pub async fn reap(&self) -> ReapReport {
        if !self.is_enabled() {
            debug!("Process reaper disabled, skipping");
            return ReapReport::default();
        }

        let names = self.process_names.clone();
        let sweep = task::spawn_blocking(move || reap_blocking(&names));

        match tokio::time::timeout(self.timeout, sweep).await {
            Ok(Ok(report)) => {
                if report.matched > 0 {
                    info!(
                        matched = report.matched,
                        killed = report.killed,
                        "Orphaned browser processes cleaned up"
                    );
                }
                report
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Process reaper task failed (non-critical)");
                ReapReport::default()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Process reaper timed out (non-critical)"
                );
                ReapReport::default()
            }
        }
    }
}

/// Returns true if the process name contains any of `names`.
pub(crate) fn name_matches(process: &Process, names: &[String]) -> bool {
    let name: &OsStr = process.name().as_ref();
    let name = name.to_string_lossy();
    names.iter().any(|needle| name.contains(needle.as_str()))
}

/// Processes matching `names`, never including the daemon itself.
pub(crate) fn matching_processes<'a>(
    system: &'a System,
    names: &'a [String],
) -> impl Iterator<Item = (&'a Pid, &'a Process)> + 'a {
    let own = Pid::from_u32(process::id());
    system
        .processes()
        .iter()
        .filter(move |(pid, proc_)| **pid != own && name_matches(proc_, names))
}

fn reap_blocking(names: &[String]) -> ReapReport {
    let system = System::new_all();
    let mut report = ReapReport::default();

    for (pid, proc_) in matching_processes(&system, names) {
        report.matched += 1;
        if proc_.kill() {
            report.killed += 1;
            debug!(pid = pid.as_u32(), "Killed orphaned process");
        } else {
            debug!(pid = pid.as_u32(), "Could not kill process");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_reaper_is_noop() {
        let reaper = Reaper::disabled();
        assert!(!reaper.is_enabled());
        assert_eq!(reaper.reap().await, ReapReport::default());
    }

    #[tokio::test]
    async fn test_enabled_without_names_is_noop() {
        let config = ReaperConfig {
            process_names: Vec::new(),
            ..Default::default()
        };
        let reaper = Reaper::new(&config, true);
        assert!(!reaper.is_enabled());
        assert_eq!(reaper.reap().await, ReapReport::default());
    }

    #[tokio::test]
    async fn test_no_match_kills_nothing() {
        let config = ReaperConfig {
            process_names: vec!["wagate-no-such-process-7f3a".to_string()],
            ..Default::default()
        };
        let report = Reaper::new(&config, true).reap().await;
        assert_eq!(report.matched, 0);
        assert_eq!(report.killed, 0);
    }

    #[test]
    fn test_daemon_never_matches_itself() {
        let system = System::new_all();
        let own = Pid::from_u32(process::id());
        // Match everything; our own pid must still be skipped.
        let names = vec![String::new()];
        assert!(matching_processes(&system, &names).all(|(pid, _)| *pid != own));
    }
}
