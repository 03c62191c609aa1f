//! The fixed phase sequence, run end to end.

use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::phase::{PhaseOutcome, PhaseRunner};
use crate::records::ImportRecord;
use crate::repository::{EntityRepository, Repository};
use crate::run_context::RunContext;
use crate::source::{ImportSources, PageSource};
use crate::types::{ImportRun, Phase, RunStatus};

use super::Orchestrator;

impl Orchestrator {
    /// Run a complete import
    ///
    /// Starts a run, resumes from the checkpoint of an unfinished run if there is one,
    /// imports every phase in order and finalizes the run as COMPLETED, CANCELLED or
    /// FAILED. Phases without a source are skipped.
    ///
    /// # Errors
    ///
    /// Errors that prevent the run from starting ([`Error::AlreadyRunning`], database
    /// errors). Failures during the run end up in the returned run's status and report.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use federation_import::*;
    /// # async fn example(orchestrator: Orchestrator, sources: ImportSources) -> Result<()> {
    /// let run = orchestrator.run(&sources).await?;
    /// println!("run {} finished with {}", run.id, run.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, sources: &ImportSources) -> Result<ImportRun> {
        let checkpoint = self.load_checkpoint().await?;
        let (run_id, done) = self.start_run(true).await?;
        let ctx = self.require_active().await?;

        if let Some(checkpoint) = &checkpoint {
            tracing::info!(
                run_id = run_id.get(),
                phase = %checkpoint.current_phase,
                batch_index = checkpoint.current_batch_index,
                processed = checkpoint.processed_ids.len(),
                "Resuming from checkpoint"
            );
        }

        let result = self
            .run_pipeline(&ctx, sources, checkpoint.as_ref())
            .await;
        drop(ctx);

        match result {
            Ok(()) => {
                if let Some(ctx) = self.take_active(Some(run_id)).await {
                    self.finalize(&ctx, RunStatus::Completed, None).await?;
                }
            }
            // cancelled through the registry or the token rather than `cancel()`
            Err(e) if e.is_cancelled() => {
                if let Some(ctx) = self.take_active(Some(run_id)).await {
                    self.finalize(&ctx, RunStatus::Cancelled, Some(e.to_string()))
                        .await?;
                }
            }
            Err(e) => self.fail(run_id, &e).await?,
        }
        // wakes a `cancel()` waiting on this pipeline
        if let Some(done) = done {
            done.send_replace(true);
        }

        self.get_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("import run {run_id} not found")))
    }

    async fn run_pipeline(
        &self,
        ctx: &RunContext,
        sources: &ImportSources,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<()> {
        let resume_index = checkpoint.map_or(0, |c| c.current_phase.index());

        for phase in Phase::PIPELINE {
            if phase.index() < resume_index {
                tracing::debug!(phase = %phase, "Phase finished in an earlier run, skipping");
                continue;
            }
            ctx.check_cancelled()?;
            ctx.check_timeout()?;

            let resume = checkpoint.filter(|c| c.current_phase == phase);
            match phase {
                Phase::Clubs => self.import(ctx, sources.clubs.as_deref(), resume).await?,
                Phase::Players => self.import(ctx, sources.players.as_deref(), resume).await?,
                Phase::ClubMembers => {
                    self.import(ctx, sources.club_members.as_deref(), resume)
                        .await?
                }
                Phase::PlayerYearStats => {
                    self.import(ctx, sources.player_year_stats.as_deref(), resume)
                        .await?
                }
                Phase::Tournaments => {
                    self.import(ctx, sources.tournaments.as_deref(), resume)
                        .await?
                }
                Phase::Judges => self.import(ctx, sources.judges.as_deref(), resume).await?,
                Phase::TournamentChiefJudge => {
                    self.import(ctx, sources.chief_judges.as_deref(), resume)
                        .await?
                }
                Phase::PlayerTournamentHistory => {
                    self.import(ctx, sources.tournament_history.as_deref(), resume)
                        .await?
                }
                Phase::Games => self.import(ctx, sources.games.as_deref(), resume).await?,
                Phase::Statistics => {
                    self.import(ctx, sources.statistics.as_deref(), resume)
                        .await?
                }
            }
        }

        ctx.check_cancelled()
    }

    async fn import<R>(
        &self,
        ctx: &RunContext,
        source: Option<&dyn PageSource<R>>,
        resume: Option<&Checkpoint>,
    ) -> Result<()>
    where
        R: ImportRecord,
        dyn EntityRepository: Repository<R>,
    {
        let Some(source) = source else {
            tracing::info!(phase = %R::PHASE, "No source configured, skipping phase");
            return Ok(());
        };

        self.enter_phase(ctx, R::PHASE, resume).await?;
        PhaseRunner::new(ctx, source, &*self.repository)
            .run()
            .await?;
        Ok(())
    }

    /// Import one phase inside the active run
    ///
    /// For callers driving the lifecycle themselves (`start`, phases, `complete`).
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if no run is active, otherwise the errors of
    /// [`PhaseRunner::run`]. The run is not finalized on error.
    pub async fn run_phase<R>(&self, source: &dyn PageSource<R>) -> Result<PhaseOutcome>
    where
        R: ImportRecord,
        dyn EntityRepository: Repository<R>,
    {
        let ctx = self.require_active().await?;
        self.enter_phase(&ctx, R::PHASE, None).await?;
        PhaseRunner::new(&ctx, source, &*self.repository)
            .run()
            .await
    }

    /// Fetch and import specific pages of a phase again inside the active run
    ///
    /// Used to recover skipped pages by hand. Records merge into the run's totals; records
    /// already stored are counted as duplicates.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if no run is active, otherwise the errors of
    /// [`PhaseRunner::retry_pages`].
    pub async fn retry_pages<R>(
        &self,
        source: &dyn PageSource<R>,
        pages: &[u32],
    ) -> Result<PhaseOutcome>
    where
        R: ImportRecord,
        dyn EntityRepository: Repository<R>,
    {
        let ctx = self.require_active().await?;
        ctx.check_cancelled()?;
        ctx.check_timeout()?;
        PhaseRunner::new(&ctx, source, &*self.repository)
            .retry_pages(pages)
            .await
    }
}
