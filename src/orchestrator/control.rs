//! Run control surface: cancel, status, history, checkpoint lookup.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{Error, Result};
use crate::types::{ImportRun, RunId, RunStatus, StatusSnapshot};

use super::Orchestrator;

impl Orchestrator {
    /// Cancel the active run
    ///
    /// Fires the run's cancellation token, saves a checkpoint of the phase in progress and
    /// marks the run CANCELLED. The checkpoint is kept so the next run resumes from it.
    /// Phase work stops at its next chunk or batch boundary; an operation already in flight
    /// is allowed to finish.
    ///
    /// When the run is driven by [`Orchestrator::run`], this waits until the pipeline has
    /// stopped and finalized the run itself, so no worker of the cancelled run is still
    /// fetching or writing once this returns. A pipeline that finished its last phase before
    /// noticing the token finalizes the run as COMPLETED instead.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if no run is active, or a database error while writing the run.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use federation_import::*;
    /// # async fn example(orchestrator: Orchestrator) -> Result<()> {
    /// let run_id = orchestrator.cancel().await?;
    /// println!("cancelled run {run_id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self) -> Result<RunId> {
        let ctx = self.active_context().await.ok_or(Error::NotRunning)?;
        let run_id = ctx.run_id();
        let registered = self.registry.get(run_id).await;

        if !self.registry.cancel(run_id).await {
            ctx.cancel_token().cancel();
        }
        tracing::info!(
            run_id = run_id.get(),
            phase = %ctx.current_phase(),
            "Cancelling import run"
        );
        drop(ctx);

        if let Some(run) = registered.filter(|run| run.pipeline.is_some()) {
            tracing::debug!(run_id = run_id.get(), "Waiting for the import pipeline to stop");
            run.pipeline_stopped().await;
        }

        // a pipeline finalizes its own run; this only finds the context of a manual run
        if let Some(ctx) = self.take_active(Some(run_id)).await {
            self.finalize(&ctx, RunStatus::Cancelled, Some(Error::Cancelled.to_string()))
                .await?;
        }
        Ok(run_id)
    }

    /// Current status of the import
    ///
    /// Read from the run-state row, so an import running in another process sharing the
    /// database is reported as running too.
    pub async fn get_status(&self) -> Result<StatusSnapshot> {
        let active = self.active_context().await;
        let Some(state) = self.db.get_run_state().await? else {
            return Ok(StatusSnapshot::default());
        };

        let is_running = active.is_some()
            || (state.status == RunStatus::Running && state.locked_at.is_some());
        let last_error = state
            .last_error
            .or_else(|| active.and_then(|ctx| ctx.errors().last_message()));

        Ok(StatusSnapshot {
            is_running,
            run_id: state.run_id,
            progress: state.progress,
            current_phase: state.current_phase,
            current_operation: state.current_operation,
            last_error,
        })
    }

    /// The most recent runs, newest first
    pub async fn get_history(&self, limit: usize) -> Result<Vec<ImportRun>> {
        self.db.query_runs(limit).await
    }

    /// One run from the history
    pub async fn get_run(&self, run_id: RunId) -> Result<Option<ImportRun>> {
        self.db.get_run(run_id).await
    }

    /// Checkpoint left by an unfinished run, if any
    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.checkpoints.load().await
    }
}
