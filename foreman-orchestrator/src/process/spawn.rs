//! Detached launch of a resolved command

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::workflow::ResolvedCommand;

/// Starts `command` with stdout and stderr appended to `log_path`.
///
/// The log starts with a short header naming the group and command. The
/// child gets its own process group so terminal and server signals do not
/// reach it, and so the whole tree can be signalled at once.
pub fn spawn_logged(command: &ResolvedCommand, log_path: &Path, label: &str) -> io::Result<Child> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    write!(
        log,
        "=== Run Group: {} ===\nCMD: {}\n\nStarted: {}\n\n",
        label,
        command.display(),
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    log.flush()?;
    let stderr = log.try_clone()?;

    Command::new(&command.program)
        .args(&command.args)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .process_group(0)
        .spawn()
}
