//! Generic phase runner split into focused submodules.
//!
//! A [`PhaseRunner`] imports one record type. It walks the state machine
//! `NOT_STARTED → FETCHING → VALIDATING → PERSISTING → DONE | FAILED`:
//! - [`fetch`] - Source sessions, paced and retried page fetches, skipped pages
//! - [`persist`] - Schema and duplicate checks, batched writes, checkpoints
//!
//! Page and record failures are recovered here and end up in the run's error log. Only
//! phase-fatal errors, timeout and cancellation leave [`PhaseRunner::run`].

mod fetch;
mod persist;

use crate::error::Result;
use crate::error_log::ErrorCode;
use crate::records::ImportRecord;
use crate::repository::Repository;
use crate::run_context::RunContext;
use crate::source::{PageSession, PageSource};
use crate::types::{Phase, PhaseState};
use serde::{Deserialize, Serialize};

/// What one phase (or one manual retry) did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase that ran
    pub phase: Option<Phase>,
    /// Pages requested
    pub pages_total: u32,
    /// Pages fetched, counting pages recovered by a retry pass
    pub pages_fetched: u32,
    /// Pages still skipped when the phase finished
    pub pages_skipped: Vec<u32>,
    /// Records returned by the source
    pub records_fetched: u64,
    /// Records that passed the schema and duplicate checks
    pub records_accepted: u64,
    /// Records actually written to the store
    pub records_persisted: u64,
    /// Batches written
    pub batches_written: usize,
}

/// Imports the records of type `R` into `S`
pub struct PhaseRunner<'a, R, S>
where
    R: ImportRecord,
    S: Repository<R> + ?Sized,
{
    ctx: &'a RunContext,
    source: &'a dyn PageSource<R>,
    repository: &'a S,
    state: PhaseState,
    // false when retrying pages of a phase whose checkpoint is no longer current
    checkpointing: bool,
}

type Sessions<R> = Vec<Box<dyn PageSession<R>>>;

impl<'a, R, S> PhaseRunner<'a, R, S>
where
    R: ImportRecord,
    S: Repository<R> + ?Sized,
{
    /// Create a runner for one phase of the run in `ctx`
    pub fn new(ctx: &'a RunContext, source: &'a dyn PageSource<R>, repository: &'a S) -> Self {
        Self {
            ctx,
            source,
            repository,
            state: PhaseState::NotStarted,
            checkpointing: true,
        }
    }

    /// Phase this runner imports
    pub fn phase(&self) -> Phase {
        R::PHASE
    }

    /// Current state
    pub fn state(&self) -> PhaseState {
        self.state
    }

    fn transition(&mut self, next: PhaseState) {
        if self.state == next {
            return;
        }
        tracing::info!(
            run_id = self.ctx.run_id().get(),
            phase = %R::PHASE,
            from = %self.state,
            to = %next,
            "Phase state changed"
        );
        self.state = next;
    }

    /// Import every page of the source
    ///
    /// After the main pass, a small number of skipped pages (up to the configured limit)
    /// gets one more attempt. Pages that still fail stay in the run's skipped-page map.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::PhaseFatal`] if no source session can be opened, the page count
    ///   cannot be read, or a batch cannot be written
    /// - [`crate::Error::Timeout`] / [`crate::Error::Cancelled`] between chunks and batches
    pub async fn run(&mut self) -> Result<PhaseOutcome> {
        if self.ctx.current_phase() != R::PHASE {
            self.ctx.begin_phase(R::PHASE, None);
        }
        self.checkpointing = true;

        let result = self.execute().await;
        self.finish(result)
    }

    /// Fetch and import specific pages again, inside the same run
    ///
    /// Results merge into the run's counters. Pages that now succeed are removed from the
    /// skipped-page map; records already stored are counted as duplicates.
    pub async fn retry_pages(&mut self, pages: &[u32]) -> Result<PhaseOutcome> {
        self.checkpointing = self.ctx.current_phase() == R::PHASE;
        tracing::info!(
            run_id = self.ctx.run_id().get(),
            phase = %R::PHASE,
            pages = ?pages,
            "Retrying pages"
        );

        let result = self.execute_pages(pages).await;
        self.finish(result)
    }

    async fn execute_pages(&mut self, pages: &[u32]) -> Result<PhaseOutcome> {
        let sessions = self.open_sessions().await?;
        let mut outcome = PhaseOutcome::for_pages(R::PHASE, pages.len() as u32);
        self.import_pages(&sessions, pages, true, &mut outcome)
            .await?;
        Ok(outcome)
    }

    async fn execute(&mut self) -> Result<PhaseOutcome> {
        let sessions = self.open_sessions().await?;
        let page_count = self.page_count(&sessions).await?;
        let pages: Vec<u32> = (1..=page_count).collect();
        let mut outcome = PhaseOutcome::for_pages(R::PHASE, page_count);

        let retry_limit = self.ctx.config().batch.skipped_page_retry_limit;
        self.import_pages(&sessions, &pages, retry_limit == 0, &mut outcome)
            .await?;

        let skipped = self.ctx.skipped_pages_of(R::PHASE);
        if !skipped.is_empty() {
            if skipped.len() <= retry_limit {
                tracing::info!(
                    phase = %R::PHASE,
                    pages = ?skipped,
                    "Retrying skipped pages before finishing phase"
                );
                self.import_pages(&sessions, &skipped, true, &mut outcome)
                    .await?;
            } else {
                // logged as retried by the main pass; no retry is coming
                let settled = self
                    .ctx
                    .errors()
                    .mark_critical(ErrorCode::PageSkipped, R::PHASE, &skipped);
                tracing::warn!(
                    phase = %R::PHASE,
                    skipped = skipped.len(),
                    retry_limit,
                    settled,
                    "Too many skipped pages for a retry pass"
                );
            }
        }

        Ok(outcome)
    }

    /// FETCHING → VALIDATING → PERSISTING for a list of pages
    async fn import_pages(
        &mut self,
        sessions: &Sessions<R>,
        pages: &[u32],
        final_pass: bool,
        outcome: &mut PhaseOutcome,
    ) -> Result<()> {
        self.transition(PhaseState::Fetching);
        let fetched = self.fetch_pages(sessions, pages, final_pass, outcome).await?;

        self.transition(PhaseState::Validating);
        let accepted = self.validate(fetched).await;
        outcome.records_accepted += accepted.len() as u64;

        self.transition(PhaseState::Persisting);
        self.persist(&accepted, outcome).await
    }

    fn finish(&mut self, result: Result<PhaseOutcome>) -> Result<PhaseOutcome> {
        match result {
            Ok(mut outcome) => {
                outcome.pages_skipped = self.ctx.skipped_pages_of(R::PHASE);
                self.transition(PhaseState::Done);
                tracing::info!(
                    run_id = self.ctx.run_id().get(),
                    phase = %R::PHASE,
                    pages_total = outcome.pages_total,
                    pages_fetched = outcome.pages_fetched,
                    pages_skipped = outcome.pages_skipped.len(),
                    records_fetched = outcome.records_fetched,
                    records_persisted = outcome.records_persisted,
                    batches = outcome.batches_written,
                    "Phase finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.transition(PhaseState::Failed);
                if !e.is_cancelled() {
                    tracing::error!(
                        run_id = self.ctx.run_id().get(),
                        phase = %R::PHASE,
                        error = %e,
                        "Phase failed"
                    );
                }
                Err(e)
            }
        }
    }
}

impl PhaseOutcome {
    fn for_pages(phase: Phase, pages_total: u32) -> Self {
        Self {
            phase: Some(phase),
            pages_total,
            ..Self::default()
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
