//! Per-run state shared by the orchestrator and the phase runners.
//!
//! A [`RunContext`] is created when a run starts and passed explicitly to every phase. It
//! carries the cancellation token, the run-wide leaves (rate limiter, retry manager, timer,
//! validation tracker, error log), the skipped-page map and the checkpoint tracker of the
//! phase in progress.

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointTracker};
use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::error_log::ErrorLog;
use crate::integrity::IntegrityReport;
use crate::rate_limiter::RateLimiter;
use crate::report::RunReport;
use crate::retry::RetryManager;
use crate::timeout::TimeoutManager;
use crate::types::{Phase, RunId, SkippedPages};
use crate::validation::ValidationTracker;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// State of one import run
pub struct RunContext {
    run_id: RunId,
    config: Arc<ImportConfig>,
    cancel_token: CancellationToken,
    rate_limiter: RateLimiter,
    retry: RetryManager,
    timeout: TimeoutManager,
    validation: ValidationTracker,
    errors: ErrorLog,
    skipped: Mutex<SkippedPages>,
    tracker: Mutex<CheckpointTracker>,
    checkpoints: Arc<dyn CheckpointStore>,
    records_persisted: AtomicU64,
    consecutive_failed_pages: AtomicU32,
}

impl RunContext {
    /// Create the context of a new run
    ///
    /// The timer is not started; call [`TimeoutManager::start`] through [`Self::timeout`].
    pub fn new(
        run_id: RunId,
        config: Arc<ImportConfig>,
        checkpoints: Arc<dyn CheckpointStore>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            rate_limiter: RateLimiter::new(config.rate_limit.min_delay),
            retry: RetryManager::new(config.retry.clone()),
            timeout: TimeoutManager::new(config.timeout.max_duration),
            validation: ValidationTracker::new(config.validation.min_validation_rate),
            errors: ErrorLog::new(),
            skipped: Mutex::new(SkippedPages::new()),
            tracker: Mutex::new(CheckpointTracker::for_phase(Phase::PIPELINE[0])),
            checkpoints,
            records_persisted: AtomicU64::new(0),
            consecutive_failed_pages: AtomicU32::new(0),
            cancel_token,
            config,
        }
    }

    /// Run this context belongs to
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Effective configuration
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Cancellation token of the run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Fail with [`Error::Timeout`] once the run budget is spent
    ///
    /// A timer that was never started is not treated as exceeded.
    pub fn check_timeout(&self) -> Result<()> {
        if !self.timeout.is_started() {
            return Ok(());
        }
        self.timeout.check()
    }

    /// Pacing of source calls
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Retry policy for source calls
    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    /// Run-duration timer
    pub fn timeout(&self) -> &TimeoutManager {
        &self.timeout
    }

    /// Record counters
    pub fn validation(&self) -> &ValidationTracker {
        &self.validation
    }

    /// Non-fatal failures
    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    fn skipped(&self) -> MutexGuard<'_, SkippedPages> {
        self.skipped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker(&self) -> MutexGuard<'_, CheckpointTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the skipped-page map
    pub fn skipped_pages(&self) -> SkippedPages {
        self.skipped().clone()
    }

    /// Record a page that failed every attempt
    pub fn skip_page(&self, phase: Phase, page: u32) {
        self.skipped().add(phase, page);
    }

    /// Forget a skipped page that was fetched after all
    pub fn unskip_page(&self, phase: Phase, page: u32) {
        self.skipped().remove(phase, page);
    }

    /// Pages of a phase currently marked as skipped
    pub fn skipped_pages_of(&self, phase: Phase) -> Vec<u32> {
        self.skipped().pages(phase)
    }

    /// Whether enough consecutive pages failed to assume the source is down
    ///
    /// The phase runner samples this once per fetch chunk: pages of the chunk that crosses
    /// the threshold keep the normal back-off, and the counter can move by up to
    /// `concurrency` per chunk.
    pub fn is_full_outage(&self) -> bool {
        let threshold = self.config.retry.full_outage_threshold;
        threshold > 0 && self.consecutive_failed_pages.load(Ordering::SeqCst) >= threshold
    }

    /// Account for a page that failed every attempt
    pub fn record_page_failure(&self) {
        let failed = self.consecutive_failed_pages.fetch_add(1, Ordering::SeqCst) + 1;
        if failed == self.config.retry.full_outage_threshold {
            tracing::warn!(
                run_id = self.run_id.get(),
                consecutive_failures = failed,
                "Source looks unreachable, switching to full-outage back-off"
            );
        }
    }

    /// Account for a page that was fetched
    pub fn record_page_success(&self) {
        let previous = self.consecutive_failed_pages.swap(0, Ordering::SeqCst);
        if previous >= self.config.retry.full_outage_threshold && previous > 0 {
            tracing::info!(run_id = self.run_id.get(), "Source reachable again");
        }
    }

    /// Count records written to the store
    pub fn add_records_persisted(&self, count: u64) {
        self.records_persisted.fetch_add(count, Ordering::SeqCst);
    }

    /// Records written to the store during this run
    pub fn records_persisted(&self) -> u64 {
        self.records_persisted.load(Ordering::SeqCst)
    }

    /// Start tracking a phase, optionally continuing a saved checkpoint
    ///
    /// A checkpoint for a different phase is ignored.
    pub fn begin_phase(&self, phase: Phase, resume: Option<&Checkpoint>) {
        let tracker = match resume {
            Some(checkpoint) if checkpoint.current_phase == phase => {
                tracing::info!(
                    run_id = self.run_id.get(),
                    phase = %phase,
                    batch_index = checkpoint.current_batch_index,
                    processed = checkpoint.processed_ids.len(),
                    "Resuming phase from checkpoint"
                );
                CheckpointTracker::resume_from(checkpoint)
            }
            _ => CheckpointTracker::for_phase(phase),
        };
        *self.tracker() = tracker;
    }

    /// Phase whose progress is being tracked
    pub fn current_phase(&self) -> Phase {
        self.tracker().phase()
    }

    /// Run `f` with the checkpoint tracker locked
    ///
    /// `f` must not block; the lock is a plain mutex.
    pub fn with_tracker<T>(&self, f: impl FnOnce(&mut CheckpointTracker) -> T) -> T {
        f(&mut self.tracker())
    }

    /// Persist a snapshot of the tracked progress
    pub async fn save_checkpoint(&self) -> Result<Checkpoint> {
        let checkpoint = self.tracker().snapshot();
        self.checkpoints.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Snapshot of every counter for the run row
    pub async fn report(
        &self,
        integrity: Option<IntegrityReport>,
        last_error: Option<String>,
    ) -> RunReport {
        RunReport {
            error_summary: self.errors.summary(),
            validation: self.validation.summary(),
            integrity,
            skipped_pages: self.skipped_pages(),
            retry: self.retry.metrics(),
            rate_limiter: self.rate_limiter.stats().await,
            timeout: self.timeout.get_summary().ok(),
            last_error: last_error.or_else(|| self.errors.last_message()),
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .field("records_persisted", &self.records_persisted())
            .finish_non_exhaustive()
    }
}
