//! Orchestrator configuration
//!
//! Defines the concurrency ceiling, run budget, timing of the stop and
//! admission sequences, and where jobs, playbooks and the database live.

use std::path::PathBuf;
use std::time::Duration;

/// Poll step used while waiting for a signalled process to exit
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of job directories and the admission gate lock file
    pub data_dir: PathBuf,

    /// SQLite database holding job documents
    pub database_path: PathBuf,

    /// HTTP listen address
    pub bind_addr: String,

    /// Maximum number of simultaneously live run groups on this host
    pub max_concurrent_runs: usize,

    /// Wall-clock budget after which the reaper kills a run
    pub max_run_duration: Duration,

    /// How often the reaper sweeps locally spawned processes
    pub reaper_interval: Duration,

    /// How long a stopped process may take to exit after SIGTERM
    pub stop_grace: Duration,

    /// How long a caller waits for the admission gate
    pub gate_timeout: Duration,

    /// Directory holding playbooks and the default inventory
    pub playbook_root: PathBuf,

    /// Executable launched for every run
    pub runner_program: String,

    /// Optional JSON file replacing the built-in workflow to playbook map
    pub workflow_catalog: Option<PathBuf>,

    /// Optional replacement for the built-in tag vocabulary
    pub valid_tags: Option<Vec<String>>,
}

impl Config {
    /// Creates a new configuration rooted at `data_dir` with defaults
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join("jobs.db"),
            playbook_root: data_dir.join("playbooks"),
            data_dir,
            bind_addr: "0.0.0.0:8080".to_string(),
            max_concurrent_runs: 50,
            max_run_duration: Duration::from_secs(4 * 60 * 60),
            reaper_interval: Duration::from_secs(60),
            stop_grace: Duration::from_millis(3000),
            gate_timeout: Duration::from_secs(15),
            runner_program: "ansible-playbook".to_string(),
            workflow_catalog: None,
            valid_tags: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - FOREMAN_DATA_DIR (default: ./data)
    /// - FOREMAN_DATABASE_PATH (default: <data dir>/jobs.db)
    /// - FOREMAN_BIND_ADDR (default: 0.0.0.0:8080)
    /// - FOREMAN_MAX_CONCURRENT_RUNS (default: 50)
    /// - FOREMAN_MAX_RUN_SECONDS (default: 14400)
    /// - FOREMAN_REAPER_INTERVAL_SECONDS (default: 60)
    /// - FOREMAN_STOP_GRACE_MILLIS (default: 3000)
    /// - FOREMAN_GATE_TIMEOUT_SECONDS (default: 15)
    /// - FOREMAN_PLAYBOOK_ROOT (default: <data dir>/playbooks)
    /// - FOREMAN_RUNNER_PROGRAM (default: ansible-playbook)
    /// - FOREMAN_WORKFLOW_CATALOG (JSON file, workflow key -> playbook file)
    /// - FOREMAN_VALID_TAGS (comma separated)
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = std::env::var("FOREMAN_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let mut config = Self::new(data_dir);

        if let Ok(path) = std::env::var("FOREMAN_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(addr) = std::env::var("FOREMAN_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(max) = env_parse::<usize>("FOREMAN_MAX_CONCURRENT_RUNS")? {
            config.max_concurrent_runs = max;
        }

        if let Some(secs) = env_parse::<u64>("FOREMAN_MAX_RUN_SECONDS")? {
            config.max_run_duration = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("FOREMAN_REAPER_INTERVAL_SECONDS")? {
            config.reaper_interval = Duration::from_secs(secs);
        }

        if let Some(millis) = env_parse::<u64>("FOREMAN_STOP_GRACE_MILLIS")? {
            config.stop_grace = Duration::from_millis(millis);
        }

        if let Some(secs) = env_parse::<u64>("FOREMAN_GATE_TIMEOUT_SECONDS")? {
            config.gate_timeout = Duration::from_secs(secs);
        }

        if let Ok(root) = std::env::var("FOREMAN_PLAYBOOK_ROOT") {
            config.playbook_root = PathBuf::from(root);
        }

        if let Ok(program) = std::env::var("FOREMAN_RUNNER_PROGRAM") {
            config.runner_program = program;
        }

        config.workflow_catalog = std::env::var("FOREMAN_WORKFLOW_CATALOG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        config.valid_tags = std::env::var("FOREMAN_VALID_TAGS")
            .ok()
            .map(|raw| foreman_core::domain::tags::normalize_tags(&[raw]))
            .filter(|tags| !tags.is_empty());

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_runs == 0 {
            anyhow::bail!("max_concurrent_runs must be greater than 0");
        }

        if self.max_run_duration.is_zero() {
            anyhow::bail!("max_run_duration must be greater than 0");
        }

        if self.reaper_interval.is_zero() {
            anyhow::bail!("reaper_interval must be greater than 0");
        }

        if self.stop_grace.is_zero() {
            anyhow::bail!("stop_grace must be greater than 0");
        }

        if self.gate_timeout.is_zero() {
            anyhow::bail!("gate_timeout must be greater than 0");
        }

        if self.runner_program.trim().is_empty() {
            anyhow::bail!("runner_program cannot be empty");
        }

        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        Ok(())
    }

    /// Lock file backing the cross-process admission gate
    pub fn gate_lock_path(&self) -> PathBuf {
        self.data_dir.join(".run_gate.lock")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("./data")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = Config::new("/srv/foreman");
        assert_eq!(config.data_dir, PathBuf::from("/srv/foreman"));
        assert_eq!(config.database_path, PathBuf::from("/srv/foreman/jobs.db"));
        assert_eq!(config.max_concurrent_runs, 50);
        assert_eq!(config.max_run_duration, Duration::from_secs(14400));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.stop_grace, Duration::from_secs(3));
        assert_eq!(config.gate_timeout, Duration::from_secs(15));
        assert_eq!(config.runner_program, "ansible-playbook");
    }

    #[test]
    fn test_config_validate_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_ceiling() {
        let mut config = Config::default();
        config.max_concurrent_runs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_budget() {
        let mut config = Config::default();
        config.max_run_duration = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_intervals() {
        let mut config = Config::default();
        config.reaper_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stop_grace = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_empty_program() {
        let mut config = Config::default();
        config.runner_program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_lock_path() {
        let config = Config::new("/srv/foreman");
        assert_eq!(
            config.gate_lock_path(),
            PathBuf::from("/srv/foreman/.run_gate.lock")
        );
    }
}
