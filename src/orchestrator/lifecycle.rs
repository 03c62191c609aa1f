//! Run lifecycle: start, phase entry, completion and failure.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{Error, Result};
use crate::error_log::{ErrorCode, ErrorContext};
use crate::integrity::IntegrityChecker;
use crate::run_context::RunContext;
use crate::types::{Phase, RunId, RunStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;

impl Orchestrator {
    /// Start a new import run
    ///
    /// Takes the run lock, closes runs a crashed process left RUNNING, opens the run record,
    /// starts the run timer and registers the run.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if this orchestrator or another process is running an import
    /// - Database errors while opening the run; the lock is released again in that case
    pub async fn start(&self) -> Result<RunId> {
        let (run_id, _) = self.start_run(false).await?;
        Ok(run_id)
    }

    /// Start a run, with a completion signal when a pipeline is going to drive it
    ///
    /// The pipeline sends `true` once it finalized the run; dropping the sender counts too.
    pub(super) async fn start_run(
        &self,
        pipeline: bool,
    ) -> Result<(RunId, Option<watch::Sender<bool>>)> {
        let mut active = self.active.lock().await;
        if let Some(ctx) = active.as_ref() {
            return Err(Error::AlreadyRunning {
                run_id: Some(ctx.run_id()),
            });
        }

        if let Some(previous) = self.run_lock.acquire().await? {
            tracing::warn!(
                previous_run = previous.get(),
                "Previous import did not release the run lock"
            );
        }

        match self.open_run(pipeline).await {
            Ok((ctx, done)) => {
                let run_id = ctx.run_id();
                *active = Some(ctx);
                tracing::info!(run_id = run_id.get(), pipeline, "Import run started");
                Ok((run_id, done))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open import run");
                if let Err(release_err) = self.run_lock.release(RunStatus::Failed).await {
                    tracing::error!(error = %release_err, "Failed to release run lock");
                }
                Err(e)
            }
        }
    }

    async fn open_run(
        &self,
        pipeline: bool,
    ) -> Result<(Arc<RunContext>, Option<watch::Sender<bool>>)> {
        let abandoned = self.db.fail_abandoned_runs().await?;
        if abandoned > 0 {
            tracing::warn!(runs = abandoned, "Marked abandoned runs as FAILED");
        }

        let run_id = self.db.create_run().await?;
        self.run_lock.attach(run_id).await?;

        let cancel_token = CancellationToken::new();
        let ctx = Arc::new(RunContext::new(
            run_id,
            self.config.clone(),
            self.checkpoints.clone(),
            cancel_token.clone(),
        ));
        ctx.timeout().start();

        let (done, stopped) = if pipeline {
            let (done, stopped) = watch::channel(false);
            (Some(done), Some(stopped))
        } else {
            (None, None)
        };
        self.registry.register(run_id, cancel_token, stopped).await;
        Ok((ctx, done))
    }

    /// Enter `phase` in the active run
    ///
    /// Resets the checkpoint tracker to the new phase, publishes the coarse progress and
    /// saves an initial checkpoint for the phase.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if no run is active, or a database error while updating state.
    pub async fn set_phase(&self, phase: Phase) -> Result<()> {
        let ctx = self.require_active().await?;
        self.enter_phase(&ctx, phase, None).await
    }

    pub(super) async fn enter_phase(
        &self,
        ctx: &RunContext,
        phase: Phase,
        resume: Option<&Checkpoint>,
    ) -> Result<()> {
        ctx.begin_phase(phase, resume);
        self.registry.set_phase(ctx.run_id(), phase).await;

        let operation = format!("Importing {phase}");
        self.db
            .update_run_state(Some(phase), phase.progress_percent(), Some(&operation))
            .await?;
        self.db
            .update_run_progress(ctx.run_id(), Some(phase), ctx.records_persisted())
            .await?;

        if let Err(e) = ctx.save_checkpoint().await {
            log_checkpoint_failure(ctx, phase, &e);
        }

        tracing::info!(
            run_id = ctx.run_id().get(),
            phase = %phase,
            progress = phase.progress_percent(),
            "Phase started"
        );
        Ok(())
    }

    /// Fail with [`Error::Timeout`] once the active run used up its time budget
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], or [`Error::NotRunning`] if no run is active.
    pub async fn check_timeout(&self) -> Result<()> {
        self.require_active().await?.check_timeout()
    }

    /// Fail with [`Error::Cancelled`] once the active run was cancelled
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], or [`Error::NotRunning`] if no run is active.
    pub async fn check_cancellation(&self) -> Result<()> {
        self.require_active().await?.check_cancelled()
    }

    /// Finish the active run
    ///
    /// On success the integrity check runs, its report is attached to the run and the
    /// checkpoint is cleared. An integrity FAIL does not change the COMPLETED status.
    /// Without success the run is FAILED and the checkpoint stays for a later resume.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if no run is active, or a database error while writing the run.
    pub async fn complete(&self, success: bool) -> Result<RunStatus> {
        let ctx = self.take_active(None).await.ok_or(Error::NotRunning)?;
        let status = if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.finalize(&ctx, status, None).await?;
        Ok(status)
    }

    /// Finish run `run_id` as FAILED because of `error`
    ///
    /// Does nothing if the run was already finalized (for example by `cancel`).
    pub(super) async fn fail(&self, run_id: RunId, error: &Error) -> Result<()> {
        let Some(ctx) = self.take_active(Some(run_id)).await else {
            return Ok(());
        };

        if let Error::Timeout { .. } = error {
            ctx.errors().log(
                error.to_string(),
                ErrorCode::Timeout,
                ErrorContext::phase(ctx.current_phase()).with_operation("check_timeout"),
                false,
            );
        }
        if let Err(e) = self.db.set_run_state_error(&error.to_string()).await {
            tracing::error!(run_id = run_id.get(), error = %e, "Failed to record run error");
        }

        self.finalize(&ctx, RunStatus::Failed, Some(error.to_string()))
            .await
    }

    /// Write the terminal status of a run taken out of the active slot
    ///
    /// Every step is attempted even if an earlier one fails; the run row write decides the
    /// result.
    pub(super) async fn finalize(
        &self,
        ctx: &RunContext,
        status: RunStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        let run_id = ctx.run_id();
        let entered_phase = self
            .registry
            .get(run_id)
            .await
            .and_then(|run| run.current_phase);

        let integrity = if status == RunStatus::Completed {
            Some(IntegrityChecker::new(self.integrity.clone()).check_all().await)
        } else {
            None
        };

        if status == RunStatus::Completed {
            if let Err(e) = self.checkpoints.clear().await {
                tracing::error!(run_id = run_id.get(), error = %e, "Failed to clear checkpoint");
            }
        } else if let Some(phase) = entered_phase
            && let Err(e) = ctx.save_checkpoint().await
        {
            log_checkpoint_failure(ctx, phase, &e);
        }

        let report = ctx.report(integrity, last_error).await;
        let records = ctx.records_persisted();
        let finished = self
            .db
            .finish_run(run_id, status, records, Some(&report))
            .await;

        if status == RunStatus::Completed
            && let Err(e) = self.db.update_run_state(entered_phase, 100, None).await
        {
            tracing::error!(run_id = run_id.get(), error = %e, "Failed to update run state");
        }
        if let Err(e) = self.run_lock.release(status).await {
            tracing::error!(run_id = run_id.get(), error = %e, "Failed to release run lock");
        }
        self.registry.remove(run_id).await;

        tracing::info!(
            run_id = run_id.get(),
            status = %status,
            records_processed = records,
            errors = report.error_summary.total,
            skipped_pages = report.skipped_pages.total(),
            validation_rate = report.validation.metrics.validation_rate,
            degraded = report.validation.degraded,
            integrity_issues = report.has_integrity_issues(),
            "Import run finished"
        );

        match finished {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(run_id = run_id.get(), "Run was already finished");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn log_checkpoint_failure(ctx: &RunContext, phase: Phase, error: &Error) {
    tracing::warn!(run_id = ctx.run_id().get(), phase = %phase, error = %error, "Checkpoint save failed");
    ctx.errors().log(
        format!("checkpoint for {phase} not saved: {error}"),
        ErrorCode::CheckpointFailed,
        ErrorContext::phase(phase).with_operation("save_checkpoint"),
        false,
    );
}
