//! Import run history.
//!
//! One row per run attempt. Rows are created RUNNING and move to a terminal status exactly
//! once; later attempts to finish an already-finished run are ignored.

use crate::report::RunReport;
use crate::types::{ImportRun, Phase, RunId, RunStatus};
use crate::{Error, Result};

use super::{Database, RunRow};

impl Database {
    /// Insert a new RUNNING run
    pub async fn create_run(&self) -> Result<RunId> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO import_runs (status, started_at, records_processed)
            VALUES (?, ?, 0)
            "#,
        )
        .bind(RunStatus::Running.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(RunId(result.last_insert_rowid()))
    }

    /// Record the phase a run entered and its running record count
    pub async fn update_run_progress(
        &self,
        id: RunId,
        phase: Option<Phase>,
        records_processed: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET current_phase = COALESCE(?, current_phase), records_processed = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(phase.map(|p| p.as_str()))
        .bind(records_processed as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Move a run to a terminal status and attach its report
    ///
    /// Returns false if the run was already terminal (or does not exist).
    pub async fn finish_run(
        &self,
        id: RunId,
        status: RunStatus,
        records_processed: u64,
        report: Option<&RunReport>,
    ) -> Result<bool> {
        let payload = report.map(serde_json::to_string).transpose()?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = ?, ended_at = ?, records_processed = ?, error_payload = ?
            WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(records_processed as i64)
        .bind(payload)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark runs left RUNNING by a crashed process as FAILED
    ///
    /// Only called while holding the run lock, so no other run can be active. Returns the
    /// number of runs closed.
    pub async fn fail_abandoned_runs(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'FAILED', ended_at = ?
            WHERE status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }

    /// Get a run by ID
    pub async fn get_run(&self, id: RunId) -> Result<Option<ImportRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, status, started_at, ended_at, records_processed, current_phase,
                   error_payload
            FROM import_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(ImportRun::from))
    }

    /// Most recent runs first
    pub async fn query_runs(&self, limit: usize) -> Result<Vec<ImportRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, status, started_at, ended_at, records_processed, current_phase,
                   error_payload
            FROM import_runs
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ImportRun::from).collect())
    }

    /// Number of runs in the history
    pub async fn count_runs(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM import_runs")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}
