//! Process liveness oracle
//!
//! A stored pid is only trusted together with a probe: `kill(pid, 0)` tells
//! whether the pid exists, `/proc/<pid>/status` tells whether it is a zombie
//! that exited but was never reaped.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Kernel-reported scheduling state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Zombie,
    Dead,
}

/// True if `pid` names a process that has not exited
pub fn is_alive(pid: u32) -> bool {
    probe(pid) == ProcState::Running
}

/// Probes `pid` without affecting it
pub fn probe(pid: u32) -> ProcState {
    let Ok(raw) = i32::try_from(pid) else {
        return ProcState::Dead;
    };
    if raw <= 0 {
        return ProcState::Dead;
    }

    match kill(Pid::from_raw(raw), None) {
        // EPERM: the pid exists but belongs to someone else
        Ok(()) | Err(Errno::EPERM) => {}
        Err(_) => return ProcState::Dead,
    }

    match read_state(pid) {
        Some('Z') | Some('X') => ProcState::Zombie,
        // Without /proc the signal probe is all there is
        _ => ProcState::Running,
    }
}

fn read_state(pid: u32) -> Option<char> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_state(&status)
}

fn parse_state(status: &str) -> Option<char> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("State:"))
        .and_then(|rest| rest.trim_start().chars().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_state() {
        let status = "Name:\tsleep\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t42\n";
        assert_eq!(parse_state(status), Some('S'));
        assert_eq!(parse_state("State:\tZ (zombie)\n"), Some('Z'));
        assert_eq!(parse_state("Name:\tx\n"), None);
    }

    #[test]
    fn test_invalid_pids_are_dead() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_running_child_then_zombie_then_dead() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert_eq!(probe(pid), ProcState::Running);

        child.kill().unwrap();

        // Not reaped yet: the pid still answers the signal probe
        let deadline = Instant::now() + Duration::from_secs(5);
        while probe(pid) == ProcState::Running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(probe(pid), ProcState::Zombie);
        assert!(!is_alive(pid));

        child.wait().unwrap();
        assert_eq!(probe(pid), ProcState::Dead);
    }
}
