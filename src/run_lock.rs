//! Single-instance mutual exclusion for imports.
//!
//! The lock lives in the `run_state` row so it holds across processes sharing the database
//! and survives restarts. A lock older than the stale window is assumed to belong to a
//! crashed process and is taken over.

use crate::db::{Database, LockAcquisition};
use crate::error::{Error, Result};
use crate::types::{RunId, RunStatus};
use std::sync::Arc;
use std::time::Duration;

/// The import run lock
#[derive(Clone)]
pub struct RunLock {
    db: Arc<Database>,
    stale_after: Duration,
}

impl RunLock {
    /// Lock backed by `db`, taken over once older than `stale_after`
    pub fn new(db: Arc<Database>, stale_after: Duration) -> Self {
        Self { db, stale_after }
    }

    /// Take the lock
    ///
    /// Returns the run whose stale lock was taken over, if any.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if another import holds the lock.
    pub async fn acquire(&self) -> Result<Option<RunId>> {
        match self.db.try_acquire_run_lock(self.stale_after).await? {
            LockAcquisition::Acquired { took_over_from } => {
                tracing::debug!(took_over_from = ?took_over_from, "Run lock acquired");
                Ok(took_over_from)
            }
            LockAcquisition::Held { run_id } => Err(Error::AlreadyRunning { run_id }),
        }
    }

    /// Record which run holds the lock
    pub async fn attach(&self, run_id: RunId) -> Result<()> {
        self.db.set_run_state_run_id(run_id).await
    }

    /// Release the lock, leaving the final status of the run behind
    pub async fn release(&self, status: RunStatus) -> Result<()> {
        self.db.release_run_lock(status).await?;
        tracing::debug!(status = %status, "Run lock released");
        Ok(())
    }

    /// Whether any import currently holds the lock
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self
            .db
            .get_run_state()
            .await?
            .is_some_and(|s| s.status == RunStatus::Running && s.locked_at.is_some()))
    }
}
