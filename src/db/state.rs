//! Current-run state: the singleton `run_state` row and the run lock built on it.
//!
//! The lock is a conditional upsert. It succeeds only if the row is not RUNNING, or if the
//! lock was taken longer ago than the stale window (the holder crashed without releasing).

use crate::error::DatabaseError;
use crate::types::{Phase, RunId, RunStatus};
use crate::{Error, Result};
use std::time::Duration;

use super::{CURRENT_STATE_KEY, Database, RunState, RunStateRow};

/// Outcome of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The lock is now held by the caller
    Acquired {
        /// Run whose stale lock was taken over, if any
        took_over_from: Option<RunId>,
    },
    /// Another run holds the lock
    Held {
        /// The holding run, when it already registered its ID
        run_id: Option<RunId>,
    },
}

impl Database {
    /// Read the current-run state
    pub async fn get_run_state(&self) -> Result<Option<RunState>> {
        let row = sqlx::query_as::<_, RunStateRow>(
            r#"
            SELECT run_id, status, current_phase, progress, current_operation, last_error,
                   locked_at, updated_at
            FROM run_state
            WHERE key = ?
            "#,
        )
        .bind(CURRENT_STATE_KEY)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read run state: {}",
                e
            )))
        })?;

        Ok(row.map(RunState::from))
    }

    /// Try to take the run lock
    ///
    /// A RUNNING row whose lock is older than `stale_after` is taken over.
    pub async fn try_acquire_run_lock(&self, stale_after: Duration) -> Result<LockAcquisition> {
        let previous = self.get_run_state().await?;
        let now = chrono::Utc::now().timestamp();
        let stale_cutoff = now.saturating_sub(stale_after.as_secs() as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO run_state (
                key, run_id, status, current_phase, progress, current_operation,
                last_error, locked_at, updated_at
            )
            VALUES (?, NULL, 'RUNNING', NULL, 0, 'starting', NULL, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                run_id = NULL,
                status = 'RUNNING',
                current_phase = NULL,
                progress = 0,
                current_operation = 'starting',
                last_error = NULL,
                locked_at = excluded.locked_at,
                updated_at = excluded.updated_at
            WHERE run_state.status <> 'RUNNING'
               OR run_state.locked_at IS NULL
               OR run_state.locked_at <= ?
            "#,
        )
        .bind(CURRENT_STATE_KEY)
        .bind(now)
        .bind(now)
        .bind(stale_cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to acquire run lock: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            let holder = self.get_run_state().await?.and_then(|s| s.run_id);
            tracing::info!(holder = ?holder, "Run lock is held by another import");
            return Ok(LockAcquisition::Held { run_id: holder });
        }

        let took_over_from = match previous {
            Some(state) if state.status == RunStatus::Running => {
                tracing::warn!(
                    previous_run = ?state.run_id,
                    locked_at = ?state.locked_at,
                    "Taking over stale run lock"
                );
                state.run_id
            }
            _ => None,
        };

        Ok(LockAcquisition::Acquired { took_over_from })
    }

    /// Attach the run ID to the held lock
    pub async fn set_run_state_run_id(&self, run_id: RunId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE run_state SET run_id = ?, updated_at = ? WHERE key = ?")
            .bind(run_id)
            .bind(now)
            .bind(CURRENT_STATE_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set run id: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record the phase and step currently executing
    pub async fn update_run_state(
        &self,
        phase: Option<Phase>,
        progress: u8,
        current_operation: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE run_state
            SET current_phase = ?, progress = ?, current_operation = ?, updated_at = ?
            WHERE key = ?
            "#,
        )
        .bind(phase.map(|p| p.as_str()))
        .bind(progress as i64)
        .bind(current_operation)
        .bind(now)
        .bind(CURRENT_STATE_KEY)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update run state: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Record the last error of the current run
    pub async fn set_run_state_error(&self, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE run_state SET last_error = ?, updated_at = ? WHERE key = ?")
            .bind(message)
            .bind(now)
            .bind(CURRENT_STATE_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record run error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Release the run lock, leaving the final status behind
    pub async fn release_run_lock(&self, status: RunStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE run_state
            SET status = ?, locked_at = NULL, current_operation = NULL, updated_at = ?
            WHERE key = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(CURRENT_STATE_KEY)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to release run lock: {}",
                e
            )))
        })?;

        Ok(())
    }
}
