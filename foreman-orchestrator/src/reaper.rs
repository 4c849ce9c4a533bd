//! Stale-run reaper
//!
//! Periodically sweeps the processes this worker spawned, collecting exited
//! children and killing any that outlive the run budget. Processes spawned by
//! other workers are out of reach.

use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::process::ProcessRegistry;
use crate::process::registry::SweepReport;

/// Background sweeper over the local process table
pub struct StaleRunReaper {
    registry: ProcessRegistry,
    interval: Duration,
    max_age: Duration,
}

impl StaleRunReaper {
    pub fn new(registry: ProcessRegistry, interval: Duration, max_age: Duration) -> Self {
        Self {
            registry,
            interval,
            max_age,
        }
    }

    /// Runs the sweep loop forever
    pub async fn run(self) {
        info!(
            "Starting stale run reaper (interval: {:?}, budget: {:?})",
            self.interval, self.max_age
        );

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.sweep_once().await {
                Ok(report) => {
                    if !report.reaped.is_empty() {
                        debug!("Reaped exited pids {:?}", report.reaped);
                    }
                    for pid in &report.killed {
                        warn!("Killed run pid {} after exceeding {:?}", pid, self.max_age);
                    }
                }
                Err(e) => warn!("Reaper sweep failed: {}", e),
            }
        }
    }

    /// Performs a single sweep off the async runtime
    pub async fn sweep_once(&self) -> Result<SweepReport, tokio::task::JoinError> {
        let registry = self.registry.clone();
        let max_age = self.max_age;
        tokio::task::spawn_blocking(move || registry.sweep(max_age)).await
    }
}
