//! Graceful-then-forceful termination

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

use super::liveness::is_alive;

/// Signal delivery failure. Both variants are hard errors for the caller.
#[derive(Debug, thiserror::Error)]
pub enum TerminateError {
    #[error("failed to send SIGTERM to pid {pid}: {source}")]
    Graceful {
        pid: u32,
        #[source]
        source: Errno,
    },

    #[error("failed to send SIGKILL to pid {pid}: {source}")]
    Forceful {
        pid: u32,
        #[source]
        source: Errno,
    },
}

/// Outcome of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Signalled,
    /// The process no longer exists
    Gone,
}

/// Sends `signal` to the process group led by `pid`, falling back to the
/// process alone when `pid` leads no group.
pub fn signal_process(pid: u32, signal: Signal) -> Result<Delivery, Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    if raw <= 0 {
        return Err(Errno::EINVAL);
    }
    let target = Pid::from_raw(raw);

    if killpg(target, signal).is_ok() {
        return Ok(Delivery::Signalled);
    }

    match kill(target, signal) {
        Ok(()) => Ok(Delivery::Signalled),
        Err(Errno::ESRCH) => Ok(Delivery::Gone),
        Err(e) => Err(e),
    }
}

/// Terminates every pid in `pids`.
///
/// All processes get SIGTERM first and are then polled together every
/// `poll` for at most `grace`; survivors get SIGKILL. Blocks the calling
/// thread for roughly `grace` at most.
///
/// Returns the pids that were signalled. Pids that were already gone are
/// skipped.
pub fn terminate(
    pids: &[u32],
    grace: Duration,
    poll: Duration,
) -> Result<Vec<u32>, TerminateError> {
    let mut signalled = Vec::new();

    for &pid in pids {
        if !is_alive(pid) {
            tracing::debug!("pid {} already exited", pid);
            continue;
        }
        match signal_process(pid, Signal::SIGTERM) {
            Ok(Delivery::Signalled) => signalled.push(pid),
            Ok(Delivery::Gone) => {}
            Err(source) => return Err(TerminateError::Graceful { pid, source }),
        }
    }

    if signalled.is_empty() {
        return Ok(signalled);
    }

    let deadline = Instant::now() + grace;
    while signalled.iter().any(|pid| is_alive(*pid)) && Instant::now() < deadline {
        std::thread::sleep(poll);
    }

    let survivors: Vec<u32> = signalled
        .iter()
        .copied()
        .filter(|pid| is_alive(*pid))
        .collect();

    for &pid in &survivors {
        tracing::warn!("pid {} ignored SIGTERM for {:?}, sending SIGKILL", pid, grace);
        match signal_process(pid, Signal::SIGKILL) {
            Ok(_) => {}
            Err(source) => return Err(TerminateError::Forceful { pid, source }),
        }
    }

    // SIGKILL cannot be ignored; give the kernel a moment to tear down
    let deadline = Instant::now() + Duration::from_secs(2);
    while survivors.iter().any(|pid| is_alive(*pid)) && Instant::now() < deadline {
        std::thread::sleep(poll);
    }

    Ok(signalled)
}
