//! Shared orchestrator state
//!
//! One [`AppContext`] is built at start-up and cloned into every request
//! handler and background task.

use anyhow::Context as AnyhowContext;
use foreman_core::domain::tags::TagVocabulary;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::gate::RunGate;
use crate::layout::JobLayout;
use crate::process::ProcessRegistry;
use crate::workflow::{CommandResolver, PlaybookCatalog};

#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub layout: JobLayout,
    pub gate: RunGate,
    pub registry: ProcessRegistry,
    pub resolver: Arc<dyn CommandResolver>,
    pub tags: Arc<TagVocabulary>,
}

impl AppContext {
    /// Assembles a context from already opened parts
    pub fn new(pool: SqlitePool, config: Config, resolver: Arc<dyn CommandResolver>) -> Self {
        let tags = match &config.valid_tags {
            Some(tags) => TagVocabulary::new(tags.iter().cloned()),
            None => TagVocabulary::default(),
        };

        Self {
            layout: JobLayout::new(&config.data_dir),
            gate: RunGate::new(config.gate_lock_path(), config.gate_timeout),
            registry: ProcessRegistry::new(),
            tags: Arc::new(tags),
            resolver,
            pool,
            config: Arc::new(config),
        }
    }

    /// Creates the data directory, opens and migrates the database and
    /// loads the playbook catalogue
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;

        let pool = db::create_pool(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let mut catalog = PlaybookCatalog::new(
            &config.playbook_root,
            &config.runner_program,
            JobLayout::new(&config.data_dir),
        );
        if let Some(path) = &config.workflow_catalog {
            catalog = catalog.with_catalog_file(path)?;
            tracing::info!("Loaded workflow catalogue from {}", path.display());
        }

        Ok(Self::new(pool, config, Arc::new(catalog)))
    }
}
