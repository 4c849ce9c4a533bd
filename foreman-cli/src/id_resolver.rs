//! ID resolver module
//!
//! Job ids are long (`rack_12_20250101_120000_a1b2c3`), so commands accept
//! any unambiguous prefix and resolve it against the job list.

use anyhow::{Context, Result, anyhow};
use foreman_client::OrchestratorClient;

/// Resolve a job ID or prefix to a full job ID
///
/// An exact match wins even when it is also a prefix of another job id.
///
/// # Errors
/// Returns an error if:
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &OrchestratorClient, id_or_prefix: &str) -> Result<String> {
    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_job_id(jobs.iter().map(|j| j.job_id.as_str()), id_or_prefix)
}

fn match_job_id<'a>(ids: impl Iterator<Item = &'a str>, input: &str) -> Result<String> {
    let prefix = input.trim().to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("Job ID cannot be empty"));
    }

    let matches: Vec<&str> = ids.filter(|id| id.starts_with(&prefix)).collect();

    if let Some(exact) = matches.iter().find(|id| **id == prefix) {
        return Ok(exact.to_string());
    }

    match matches.len() {
        0 => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        1 => Ok(matches[0].to_string()),
        _ => Err(anyhow!(
            "Ambiguous prefix '{}' matches multiple jobs: {}",
            prefix,
            matches.join(", ")
        )),
    }
}
