//! Classification of a finished run from its log

use serde::{Deserialize, Serialize};

/// Completion marker the automation tool prints once all plays are done
pub const RECAP_MARKER: &str = "PLAY RECAP";

/// Result of one run (or run group) as read from its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Passed,
    Failed,
    /// No completion marker in the log
    Unknown,
}

impl RunOutcome {
    /// Scans the recap block that follows the first completion marker.
    ///
    /// Any host line with a nonzero `failed=` count makes the run failed. A
    /// marker with no readable failure count counts as passed.
    pub fn from_recap(log: &str) -> Self {
        let Some(start) = log.find(RECAP_MARKER) else {
            return RunOutcome::Unknown;
        };

        let failed = log[start..]
            .lines()
            .skip(1)
            .filter_map(failed_count)
            .any(|count| count > 0);

        if failed {
            RunOutcome::Failed
        } else {
            RunOutcome::Passed
        }
    }

    /// Textual form stored in `lastRunResult`; empty when unknown
    pub fn as_result(&self) -> &'static str {
        match self {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
            RunOutcome::Unknown => "",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Unknown => f.write_str("unknown"),
            other => f.write_str(other.as_result()),
        }
    }
}

fn failed_count(line: &str) -> Option<u64> {
    let (_, rest) = line.split_once("failed=")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
