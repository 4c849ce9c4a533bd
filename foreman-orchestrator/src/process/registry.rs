//! Worker-local table of spawned processes
//!
//! Only this worker can `wait()` on the children it spawned. The table lets
//! the reconciler collect exit statuses and lets the reaper enforce the run
//! budget. It is never consulted to decide whether a job is running.

use nix::sys::signal::Signal;
use nix::unistd::{SysconfVar, sysconf};
use std::collections::HashMap;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::terminate::signal_process;

/// A child spawned by this worker
#[derive(Debug)]
pub struct TrackedProcess {
    pub child: Child,
    pub job_id: String,
    pub group_id: String,
    pub spawned_at: Instant,
}

/// Result of one reaper sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Exited children whose status was collected
    pub reaped: Vec<u32>,
    /// Children killed for exceeding the run budget
    pub killed: Vec<u32>,
}

/// Shared pid -> child table
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<u32, TrackedProcess>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u32, TrackedProcess>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts tracking `child`, returning its pid
    pub fn register(&self, child: Child, job_id: &str, group_id: &str) -> u32 {
        let pid = child.id();
        self.table().insert(
            pid,
            TrackedProcess {
                child,
                job_id: job_id.to_string(),
                group_id: group_id.to_string(),
                spawned_at: Instant::now(),
            },
        );
        pid
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.table().contains_key(&pid)
    }

    /// Pids currently tracked
    pub fn pids(&self) -> Vec<u32> {
        self.table().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects the exit status of `pid` if this worker spawned it and it has
    /// exited. A child that is still running stays tracked.
    pub fn reap(&self, pid: u32) -> Option<ExitStatus> {
        let mut table = self.table();
        let mut tracked = table.remove(&pid)?;

        match tracked.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(
                    "Reaped pid {} ({}/{}): {}",
                    pid,
                    tracked.job_id,
                    tracked.group_id,
                    status
                );
                Some(status)
            }
            Ok(None) => {
                tracing::warn!("Pid {} reported dead but has not exited yet", pid);
                table.insert(pid, tracked);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to reap pid {}: {}", pid, e);
                None
            }
        }
    }

    /// Forcefully kills and waits for a tracked child
    pub fn kill(&self, pid: u32) -> bool {
        let Some(mut tracked) = self.table().remove(&pid) else {
            return false;
        };
        kill_and_wait(pid, &mut tracked.child);
        true
    }

    /// Collects exited children and kills the ones older than `max_age`
    pub fn sweep(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let mut table = self.table();

        let pids: Vec<u32> = table.keys().copied().collect();
        for pid in pids {
            let Some(tracked) = table.get_mut(&pid) else {
                continue;
            };

            match tracked.child.try_wait() {
                Ok(Some(_)) => {
                    table.remove(&pid);
                    report.reaped.push(pid);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Dropping pid {} after wait error: {}", pid, e);
                    table.remove(&pid);
                    continue;
                }
            }

            let age = process_age(pid).unwrap_or_else(|| tracked.spawned_at.elapsed());
            if age <= max_age {
                continue;
            }

            tracing::warn!(
                "Killing stale run pid {} ({}/{}) after {:?}",
                pid,
                tracked.job_id,
                tracked.group_id,
                age
            );
            if let Some(mut tracked) = table.remove(&pid) {
                kill_and_wait(pid, &mut tracked.child);
            }
            report.killed.push(pid);
        }

        report
    }
}

fn kill_and_wait(pid: u32, child: &mut Child) {
    if let Err(e) = signal_process(pid, Signal::SIGKILL) {
        tracing::warn!("SIGKILL to pid {} failed: {}", pid, e);
        let _ = child.kill();
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to wait for pid {}: {}", pid, e);
    }
}

/// Time since the kernel started `pid`, from `/proc/<pid>/stat` field 22
fn process_age(pid: u32) -> Option<Duration> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let start_ticks = parse_start_ticks(&stat)?;

    let ticks_per_sec = sysconf(SysconfVar::CLK_TCK).ok().flatten()?;
    if ticks_per_sec <= 0 {
        return None;
    }

    let uptime: f64 = std::fs::read_to_string("/proc/uptime")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;

    let age = uptime - start_ticks as f64 / ticks_per_sec as f64;
    (age >= 0.0).then(|| Duration::from_secs_f64(age))
}

fn parse_start_ticks(stat: &str) -> Option<u64> {
    // comm may contain spaces and parens; fields resume after the last ')'
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}
