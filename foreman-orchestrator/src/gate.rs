//! Run-admission gate
//!
//! Serializes every read-modify-write of run state across tasks in this
//! process (tokio mutex) and across server processes on the host (exclusive
//! `flock` on a shared lock file). Holders keep the [`GateGuard`] for the
//! whole count, admit, launch, persist sequence.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Retry step while another process holds the lock file
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("timed out after {0:?} waiting for the run admission gate")]
    Timeout(Duration),

    #[error("failed to open run gate lock file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to lock run gate: {0}")]
    Lock(Errno),
}

/// Cross-process mutual exclusion for run state
#[derive(Debug, Clone)]
pub struct RunGate {
    path: PathBuf,
    timeout: Duration,
    local: Arc<Mutex<()>>,
}

/// Proof of holding the gate; released on drop
pub struct GateGuard {
    _lock: Flock<File>,
    _local: OwnedMutexGuard<()>,
}

impl RunGate {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            local: Arc::new(Mutex::new(())),
        }
    }

    /// Waits up to the configured timeout for the gate
    pub async fn acquire(&self) -> Result<GateGuard, GateError> {
        let deadline = Instant::now() + self.timeout;

        let local = tokio::time::timeout_at(deadline, self.local.clone().lock_owned())
            .await
            .map_err(|_| GateError::Timeout(self.timeout))?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    return Ok(GateGuard {
                        _lock: lock,
                        _local: local,
                    });
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
                    file = returned;
                }
                Err((_, errno)) => return Err(GateError::Lock(errno)),
            }

            if Instant::now() >= deadline {
                return Err(GateError::Timeout(self.timeout));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}
