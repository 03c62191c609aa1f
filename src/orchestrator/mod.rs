//! Import orchestrator split into focused submodules.
//!
//! The [`Orchestrator`] owns the run lifecycle and the fixed phase sequence:
//! - [`lifecycle`] - Starting, entering phases, completing and failing runs
//! - [`control`] - Cancellation, status and history for the run control surface
//! - [`pipeline`] - The full import as one call, with resume from a checkpoint
//! - [`registry`] - Per-process registry of active runs
//!
//! Exactly one terminal transition happens per run: whichever of `complete`, `cancel` or
//! `run` takes the active run context finalizes the run. A run driven by `run` is always
//! finalized by its own pipeline; `cancel` fires the token and waits for it.

mod control;
mod lifecycle;
mod pipeline;
pub mod registry;


pub use registry::{ActiveRun, RunRegistry, SharedRegistry};

use crate::checkpoint::CheckpointStore;
use crate::config::ImportConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::integrity::IntegrityQueries;
use crate::repository::EntityRepository;
use crate::run_context::RunContext;
use crate::run_lock::RunLock;
use crate::types::RunId;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Drives import runs against one database
#[derive(Clone)]
pub struct Orchestrator {
    /// Run history, run state and the run lock
    pub db: Arc<Database>,
    /// Where phase runners write records
    repository: Arc<dyn EntityRepository>,
    /// Read side used by the integrity check
    integrity: Arc<dyn IntegrityQueries>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: Arc<ImportConfig>,
    registry: SharedRegistry,
    run_lock: RunLock,
    /// Context of the run this orchestrator is driving
    active: Arc<Mutex<Option<Arc<RunContext>>>>,
}

impl Orchestrator {
    /// Open the configured database and build an orchestrator on it
    ///
    /// The database stores both the imported entities and the run bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database cannot be opened.
    pub async fn new(config: ImportConfig) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        Self::from_database(config, db, RunRegistry::shared())
    }

    /// Build an orchestrator on an open database, sharing `registry` with other owners
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn from_database(
        config: ImportConfig,
        db: Arc<Database>,
        registry: SharedRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let run_lock = RunLock::new(db.clone(), config.lock.stale_after);
        Ok(Self {
            repository: db.clone(),
            integrity: db.clone(),
            checkpoints: db.clone(),
            config: Arc::new(config),
            registry,
            run_lock,
            active: Arc::new(Mutex::new(None)),
            db,
        })
    }

    /// Write entities to `repository` instead of the run database
    pub fn with_repository<T>(mut self, repository: Arc<T>) -> Self
    where
        T: EntityRepository + 'static,
    {
        self.integrity = repository.clone();
        self.repository = repository;
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Registry this orchestrator registers its runs in
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Context of the active run, if any
    pub async fn active_context(&self) -> Option<Arc<RunContext>> {
        self.active.lock().await.clone()
    }

    /// ID of the active run, if any
    pub async fn active_run_id(&self) -> Option<RunId> {
        self.active.lock().await.as_ref().map(|ctx| ctx.run_id())
    }

    async fn require_active(&self) -> Result<Arc<RunContext>> {
        self.active_context().await.ok_or(Error::NotRunning)
    }

    /// Take the active context so the caller can finalize it
    ///
    /// With `run_id`, only that run is taken. Returns `None` if another path already
    /// finalized the run.
    async fn take_active(&self, run_id: Option<RunId>) -> Option<Arc<RunContext>> {
        let mut active = self.active.lock().await;
        match (active.as_ref(), run_id) {
            (Some(ctx), Some(id)) if ctx.run_id() != id => None,
            _ => active.take(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("database", &self.config.persistence.database_path)
            .finish_non_exhaustive()
    }
}
