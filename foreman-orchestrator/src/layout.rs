//! On-disk layout of job directories
//!
//! ```text
//! <data_dir>/<job_id>/
//!     job.json                        debug copy of the job document
//!     vars.yml                        optional extra vars for the runner
//!     artifacts/
//!     runs/<run_id>/run_meta.json
//!     runs/<run_id>/<group_id>/run.log
//!     runs/<run_id>/<group_id>/run_meta.json
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use foreman_core::domain::run::run_id_at;

/// Maximum length of a job id
pub const MAX_JOB_ID_LEN: usize = 200;

/// Maximum length of a caller supplied group id
pub const MAX_GROUP_ID_LEN: usize = 64;

/// Combined output of one run group
pub const LOG_FILE: &str = "run.log";

/// Run and group metadata documents
pub const META_FILE: &str = "run_meta.json";

/// Resolves paths below the data directory
#[derive(Debug, Clone)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn runs_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("runs")
    }

    pub fn artifacts_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("artifacts")
    }

    pub fn run_dir(&self, job_id: &str, run_id: &str) -> PathBuf {
        self.runs_dir(job_id).join(run_id)
    }

    pub fn group_dir(&self, job_id: &str, run_id: &str, group_id: &str) -> PathBuf {
        self.run_dir(job_id, run_id).join(group_id)
    }

    pub fn run_meta_path(&self, job_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(job_id, run_id).join(META_FILE)
    }

    pub fn group_log_path(&self, job_id: &str, run_id: &str, group_id: &str) -> PathBuf {
        self.group_dir(job_id, run_id, group_id).join(LOG_FILE)
    }

    pub fn group_meta_path(&self, job_id: &str, run_id: &str, group_id: &str) -> PathBuf {
        self.group_dir(job_id, run_id, group_id).join(META_FILE)
    }

    pub fn job_mirror_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    pub fn vars_file(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("vars.yml")
    }

    /// Creates the job directory with its `runs/` and `artifacts/` children
    pub fn create_job_dirs(&self, job_id: &str) -> io::Result<()> {
        fs::create_dir_all(self.runs_dir(job_id))?;
        fs::create_dir_all(self.artifacts_dir(job_id))
    }

    /// Creates a fresh run directory and returns its id.
    ///
    /// The id is the start timestamp; a `_N` suffix is added when a run of the
    /// same job already claimed that second.
    pub fn allocate_run_dir(&self, job_id: &str, at: DateTime<Utc>) -> io::Result<String> {
        let runs_dir = self.runs_dir(job_id);
        fs::create_dir_all(&runs_dir)?;

        let base = run_id_at(at);
        let mut candidate = base.clone();
        let mut n = 1u32;
        loop {
            match fs::create_dir(runs_dir.join(&candidate)) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    n += 1;
                    candidate = format!("{base}_{n}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes `value` as pretty JSON via a temp file and rename
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Job ids name directories, so only `[a-z0-9_]` is accepted
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Group ids name directories under a run: `[A-Za-z0-9_.-]`, never `.`/`..`
pub fn is_valid_group_id(group_id: &str) -> bool {
    !group_id.is_empty()
        && group_id.len() <= MAX_GROUP_ID_LEN
        && group_id != "."
        && group_id != ".."
        && group_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Lowercase slug of a job name: `[a-z0-9_]`, runs of other characters
/// collapsed to one underscore
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "job".to_string()
    } else {
        slug.chars().take(120).collect()
    }
}
