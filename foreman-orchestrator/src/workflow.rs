//! Command resolution
//!
//! Turns a job plus a launch scope into the exact argument vector of the
//! automation tool. The launcher only depends on [`CommandResolver`]; the
//! default [`PlaybookCatalog`] maps workflows to ansible playbooks.

use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use foreman_core::domain::job::Job;

use crate::layout::JobLayout;

/// Default inventory file name under the playbook root
pub const DEFAULT_INVENTORY: &str = "target_hosts";

/// Workflows accepted by the built-in catalogue
pub const DEFAULT_WORKFLOWS: &[&str] = &[
    "configbuild",
    "postprov",
    "quickqc",
    "cisco_switch",
    "juniper_switch",
    "console_switch",
    "pdu",
];

/// Built-in playbook key -> playbook file map
pub const DEFAULT_PLAYBOOKS: &[(&str, &str)] = &[
    ("configbuild_j", "ConfigMain._J_class.yaml"),
    ("configbuild_i", "ConfigMain._I_class.yaml"),
    ("postprov", "post_provisioning.yaml"),
    ("quickqc", "Quick_QC.yaml"),
];

/// What to launch: the workflow and the slice of hosts/tasks it covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchScope {
    pub workflow: String,
    pub server_class: String,
    pub tags: Vec<String>,
    pub hosts: String,
}

/// Fully resolved command; executed without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub inventory: PathBuf,
    /// Workflow after defaulting and normalisation
    pub workflow: String,
    /// Server class the workflow ran with; empty when not applicable
    pub server_class: String,
}

impl ResolvedCommand {
    /// Space separated rendering for logs and metadata
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("No playbook mapped for workflow: {workflow} (key: {key})")]
    NoPlaybook { workflow: String, key: String },

    #[error("Playbook not found: {}", .0.display())]
    PlaybookMissing(PathBuf),

    #[error("Inventory not found: {} (generate it first)", .0.display())]
    InventoryMissing(PathBuf),

    #[error("Runner program not found on PATH: {0}")]
    ProgramNotFound(String),

    #[error("Invalid server class {0:?}, expected J or I")]
    InvalidServerClass(String),
}

impl ResolveError {
    /// Caller mistakes, as opposed to a broken installation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ResolveError::UnknownWorkflow(_) | ResolveError::InvalidServerClass(_)
        )
    }
}

/// Resolves launch commands for jobs
pub trait CommandResolver: Send + Sync {
    /// True if `workflow` can be used for new or updated jobs
    fn knows_workflow(&self, workflow: &str) -> bool;

    fn resolve(&self, job: &Job, scope: &LaunchScope) -> Result<ResolvedCommand, ResolveError>;
}

/// Optional JSON replacement for the built-in catalogue
#[derive(Debug, Deserialize)]
struct CatalogFile {
    playbooks: BTreeMap<String, String>,
    #[serde(default)]
    workflows: Vec<String>,
}

/// Maps workflows to playbooks under a playbook root
#[derive(Debug, Clone)]
pub struct PlaybookCatalog {
    playbook_root: PathBuf,
    runner_program: String,
    playbooks: BTreeMap<String, String>,
    workflows: BTreeSet<String>,
    layout: JobLayout,
}

impl PlaybookCatalog {
    /// Catalogue with the built-in workflow and playbook tables
    pub fn new(playbook_root: impl Into<PathBuf>, runner_program: &str, layout: JobLayout) -> Self {
        Self {
            playbook_root: playbook_root.into(),
            runner_program: runner_program.to_string(),
            playbooks: DEFAULT_PLAYBOOKS
                .iter()
                .map(|(key, file)| (key.to_string(), file.to_string()))
                .collect(),
            workflows: DEFAULT_WORKFLOWS.iter().map(|w| w.to_string()).collect(),
            layout,
        }
    }

    /// Replaces the tables with the contents of a catalogue file.
    ///
    /// Without an explicit `workflows` list, every playbook key is a
    /// workflow (`configbuild_j`/`configbuild_i` count as `configbuild`).
    pub fn with_catalog_file(mut self, path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow catalogue {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse workflow catalogue {}", path.display()))?;

        self.workflows = if file.workflows.is_empty() {
            file.playbooks
                .keys()
                .map(|key| match key.as_str() {
                    "configbuild_j" | "configbuild_i" => "configbuild".to_string(),
                    other => other.to_string(),
                })
                .collect()
        } else {
            file.workflows.iter().map(|w| w.trim().to_lowercase()).collect()
        };
        self.playbooks = file.playbooks;
        Ok(self)
    }

    fn inventory_for(&self, job: &Job) -> PathBuf {
        if job.inventory_path.trim().is_empty() {
            self.playbook_root.join(DEFAULT_INVENTORY)
        } else {
            PathBuf::from(job.inventory_path.trim())
        }
    }
}

/// Playbook key and effective server class for a workflow.
///
/// `configbuild` has one playbook per server class, defaulting to J.
pub fn playbook_key(workflow: &str, server_class: &str) -> Result<(String, String), ResolveError> {
    if workflow != "configbuild" {
        return Ok((workflow.to_string(), String::new()));
    }
    let class = match server_class.trim().to_uppercase().as_str() {
        "" | "J" => "J",
        "I" => "I",
        _ => return Err(ResolveError::InvalidServerClass(server_class.to_string())),
    };
    Ok((format!("configbuild_{}", class.to_lowercase()), class.to_string()))
}

impl CommandResolver for PlaybookCatalog {
    fn knows_workflow(&self, workflow: &str) -> bool {
        self.workflows.contains(&workflow.trim().to_lowercase())
    }

    fn resolve(&self, job: &Job, scope: &LaunchScope) -> Result<ResolvedCommand, ResolveError> {
        let workflow = scope.workflow.trim().to_lowercase();
        if !self.knows_workflow(&workflow) {
            return Err(ResolveError::UnknownWorkflow(scope.workflow.clone()));
        }

        let (key, server_class) = playbook_key(&workflow, &scope.server_class)?;
        let playbook = self
            .playbooks
            .get(&key)
            .ok_or_else(|| ResolveError::NoPlaybook {
                workflow: workflow.clone(),
                key: key.clone(),
            })?;

        let playbook_path = self.playbook_root.join(playbook);
        if !playbook_path.is_file() {
            return Err(ResolveError::PlaybookMissing(playbook_path));
        }

        let inventory = self.inventory_for(job);
        if !inventory.is_file() {
            return Err(ResolveError::InventoryMissing(inventory));
        }

        let program = find_executable(&self.runner_program)
            .ok_or_else(|| ResolveError::ProgramNotFound(self.runner_program.clone()))?;

        let mut args = vec![
            "-i".to_string(),
            inventory.to_string_lossy().into_owned(),
            playbook_path.to_string_lossy().into_owned(),
        ];
        if !scope.tags.is_empty() {
            args.push("--tags".to_string());
            args.push(scope.tags.join(","));
        }
        if !scope.hosts.trim().is_empty() {
            args.push("--limit".to_string());
            args.push(scope.hosts.trim().to_string());
        }
        let vars = self.layout.vars_file(&job.job_id);
        if vars.is_file() {
            args.push("-e".to_string());
            args.push(format!("@{}", vars.display()));
        }

        Ok(ResolvedCommand {
            program,
            args,
            working_dir: self.playbook_root.clone(),
            inventory,
            workflow,
            server_class,
        })
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

/// Resolves `name` to an executable path, searching `PATH` unless it
/// already contains a separator
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        catalog: PlaybookCatalog,
        job: Job,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("playbooks");
        fs::create_dir_all(&root).unwrap();
        for (_, file) in DEFAULT_PLAYBOOKS {
            fs::write(root.join(file), "- hosts: all\n").unwrap();
        }
        fs::write(root.join(DEFAULT_INVENTORY), "[all]\n10.0.0.1\n").unwrap();

        let layout = JobLayout::new(dir.path().join("jobs"));
        let catalog = PlaybookCatalog::new(&root, "/bin/sh", layout);
        let job = Job::new("rack_a", "Rack A", "quickqc", Utc::now());
        Fixture {
            _dir: dir,
            root,
            catalog,
            job,
        }
    }

    fn scope(workflow: &str) -> LaunchScope {
        LaunchScope {
            workflow: workflow.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_playbook_key() {
        assert_eq!(
            playbook_key("configbuild", "").unwrap(),
            ("configbuild_j".to_string(), "J".to_string())
        );
        assert_eq!(
            playbook_key("configbuild", "i").unwrap(),
            ("configbuild_i".to_string(), "I".to_string())
        );
        assert_eq!(
            playbook_key("quickqc", "J").unwrap(),
            ("quickqc".to_string(), String::new())
        );
        assert!(playbook_key("configbuild", "K").is_err());
    }

    #[test]
    fn test_resolve_builds_argument_vector() {
        let f = fixture();
        let mut scope = scope("QuickQC");
        scope.tags = vec!["powerup".to_string(), "lldp".to_string()];
        scope.hosts = "10.0.0.1".to_string();

        let command = f.catalog.resolve(&f.job, &scope).unwrap();
        assert_eq!(command.program, PathBuf::from("/bin/sh"));
        assert_eq!(command.workflow, "quickqc");
        assert_eq!(command.working_dir, f.root);
        assert_eq!(
            command.args,
            vec![
                "-i".to_string(),
                f.root.join(DEFAULT_INVENTORY).to_string_lossy().into_owned(),
                f.root.join("Quick_QC.yaml").to_string_lossy().into_owned(),
                "--tags".to_string(),
                "powerup,lldp".to_string(),
                "--limit".to_string(),
                "10.0.0.1".to_string(),
            ]
        );
    }

    #[test]
    fn test_resolve_configbuild_uses_class_playbook() {
        let f = fixture();
        let mut scope = scope("configbuild");
        scope.server_class = "I".to_string();
        let command = f.catalog.resolve(&f.job, &scope).unwrap();
        assert!(command.args[2].ends_with("ConfigMain._I_class.yaml"));
        assert_eq!(command.server_class, "I");
    }

    #[test]
    fn test_resolve_errors() {
        let f = fixture();
        assert!(matches!(
            f.catalog.resolve(&f.job, &scope("nope")),
            Err(ResolveError::UnknownWorkflow(_))
        ));
        assert!(matches!(
            f.catalog.resolve(&f.job, &scope("pdu")),
            Err(ResolveError::NoPlaybook { .. })
        ));

        fs::remove_file(f.root.join("post_provisioning.yaml")).unwrap();
        assert!(matches!(
            f.catalog.resolve(&f.job, &scope("postprov")),
            Err(ResolveError::PlaybookMissing(_))
        ));

        let mut job = f.job.clone();
        job.inventory_path = f.root.join("missing_inventory").to_string_lossy().into_owned();
        assert!(matches!(
            f.catalog.resolve(&job, &scope("quickqc")),
            Err(ResolveError::InventoryMissing(_))
        ));
    }

    #[test]
    fn test_resolve_missing_program() {
        let f = fixture();
        let catalog = PlaybookCatalog::new(
            &f.root,
            "definitely-not-a-real-program-xyz",
            JobLayout::new(f.root.join("jobs")),
        );
        assert!(matches!(
            catalog.resolve(&f.job, &scope("quickqc")),
            Err(ResolveError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn test_catalog_file_replaces_tables() {
        let f = fixture();
        let path = f.root.join("catalog.json");
        fs::write(
            &path,
            r#"{"playbooks": {"configbuild_j": "ConfigMain._J_class.yaml", "burnin": "Quick_QC.yaml"}}"#,
        )
        .unwrap();

        let catalog = f.catalog.clone().with_catalog_file(&path).unwrap();
        assert!(catalog.knows_workflow("burnin"));
        assert!(catalog.knows_workflow("configbuild"));
        assert!(!catalog.knows_workflow("quickqc"));
    }

    #[test]
    fn test_bad_catalog_file_names_the_path() {
        let f = fixture();
        let missing = f.root.join("missing.json");
        let err = f.catalog.clone().with_catalog_file(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"));

        let broken = f.root.join("broken.json");
        fs::write(&broken, "{").unwrap();
        let err = f.catalog.clone().with_catalog_file(&broken).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse workflow catalogue"));
    }

    #[test]
    fn test_find_executable() {
        assert_eq!(find_executable("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert!(find_executable("sh").is_some());
        assert!(find_executable("").is_none());
        assert!(find_executable("/nonexistent/tool").is_none());
    }
}
