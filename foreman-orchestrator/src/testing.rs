//! Test fixtures: a temp data directory, a migrated database and a resolver
//! that runs small `/bin/sh` scripts instead of playbooks.

use foreman_core::domain::job::Job;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::config::Config;
use crate::context::AppContext;
use crate::db;
use crate::process::is_alive;
use crate::workflow::{CommandResolver, LaunchScope, ResolveError, ResolvedCommand};

pub const PASSED_RECAP: &str = "PLAY RECAP ***\nhost1 : ok=1 changed=0 unreachable=0 failed=0\n";
pub const FAILED_RECAP: &str = "PLAY RECAP ***\nhost1 : ok=1 changed=0 unreachable=0 failed=2\n";

/// Workflow name -> shell script
pub struct ScriptResolver {
    scripts: HashMap<String, String>,
}

impl ScriptResolver {
    pub fn standard() -> Self {
        let scripts = [
            ("ok", format!("printf '{}'", PASSED_RECAP.replace('\n', "\\n"))),
            ("fail", format!("printf '{}'; exit 2", FAILED_RECAP.replace('\n', "\\n"))),
            ("sleep", "exec sleep 30".to_string()),
            (
                "fail_then_sleep",
                format!("printf '{}'; exec sleep 30", FAILED_RECAP.replace('\n', "\\n")),
            ),
            ("stubborn", "trap '' TERM; exec sleep 30".to_string()),
        ];
        Self {
            scripts: scripts
                .into_iter()
                .map(|(name, script)| (name.to_string(), script))
                .collect(),
        }
    }
}

impl CommandResolver for ScriptResolver {
    fn knows_workflow(&self, workflow: &str) -> bool {
        self.scripts.contains_key(workflow)
    }

    fn resolve(&self, _job: &Job, scope: &LaunchScope) -> Result<ResolvedCommand, ResolveError> {
        let script = self
            .scripts
            .get(&scope.workflow)
            .ok_or_else(|| ResolveError::UnknownWorkflow(scope.workflow.clone()))?;

        let mut args = vec![
            "-c".to_string(),
            script.clone(),
            "foreman".to_string(),
            scope.tags.join(","),
        ];
        // Extra positional parameters; the scripts ignore them
        if !scope.hosts.is_empty() {
            args.push("--limit".to_string());
            args.push(scope.hosts.clone());
        }

        Ok(ResolvedCommand {
            program: PathBuf::from("/bin/sh"),
            args,
            working_dir: std::env::temp_dir(),
            inventory: PathBuf::new(),
            workflow: scope.workflow.clone(),
            server_class: scope.server_class.clone(),
        })
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub ctx: AppContext,
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        // Never leave sleepers behind a failed assertion
        for pid in self.ctx.registry.pids() {
            self.ctx.registry.kill(pid);
        }
    }
}

/// Context over a fresh temp directory with the given concurrency ceiling
pub async fn env(max_concurrent_runs: usize) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new(dir.path().join("data"));
    config.max_concurrent_runs = max_concurrent_runs;
    config.stop_grace = Duration::from_millis(300);
    config.gate_timeout = Duration::from_secs(5);
    std::fs::create_dir_all(&config.data_dir).unwrap();

    let pool = db::create_pool(&config.database_path).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let ctx = AppContext::new(pool, config, Arc::new(ScriptResolver::standard()));
    TestEnv { dir, ctx }
}

/// Polls `check` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Waits until `pid` no longer passes the liveness probe
pub async fn wait_dead(pid: u32) -> bool {
    wait_for(Duration::from_secs(5), || !is_alive(pid)).await
}
