//! Run-duration budget
//!
//! The [`TimeoutManager`] measures wall-clock time from the moment a run starts. Phases call
//! [`TimeoutManager::check`] between phases and between batches, so an over-budget run stops
//! at the next well-defined point instead of mid-write.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Elapsed and remaining time of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSummary {
    /// Milliseconds since `start()`
    pub elapsed_ms: u64,
    /// Milliseconds left in the budget (0 once exceeded)
    pub remaining_ms: u64,
    /// Configured budget in milliseconds
    pub limit_ms: u64,
    /// Whether the budget is used up
    pub exceeded: bool,
}

/// Wall-clock budget tracker
///
/// `start()` is idempotent: the first call fixes the start instant and later calls are
/// ignored. Every query before `start()` returns [`Error::TimerNotStarted`].
#[derive(Debug)]
pub struct TimeoutManager {
    limit: Duration,
    started: Mutex<Option<Instant>>,
}

impl TimeoutManager {
    /// Create an unstarted timer with the given budget
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: Mutex::new(None),
        }
    }

    /// Configured budget
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Start the clock (no-op if already started)
    pub fn start(&self) {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        if started.is_none() {
            *started = Some(Instant::now());
            tracing::debug!(limit_secs = self.limit.as_secs(), "Run timer started");
        }
    }

    /// Whether the clock has been started
    pub fn is_started(&self) -> bool {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Time since `start()`
    pub fn elapsed(&self) -> Result<Duration> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|start| start.elapsed())
            .ok_or(Error::TimerNotStarted)
    }

    /// Whether the budget is used up
    pub fn is_exceeded(&self) -> Result<bool> {
        Ok(self.elapsed()? >= self.limit)
    }

    /// Time left in the budget, zero once exceeded
    pub fn get_remaining(&self) -> Result<Duration> {
        Ok(self.limit.saturating_sub(self.elapsed()?))
    }

    /// Snapshot for the run report
    pub fn get_summary(&self) -> Result<TimeoutSummary> {
        let elapsed = self.elapsed()?;
        Ok(TimeoutSummary {
            elapsed_ms: elapsed.as_millis() as u64,
            remaining_ms: self.limit.saturating_sub(elapsed).as_millis() as u64,
            limit_ms: self.limit.as_millis() as u64,
            exceeded: elapsed >= self.limit,
        })
    }

    /// Fail with [`Error::Timeout`] once the budget is used up
    pub fn check(&self) -> Result<()> {
        let elapsed = self.elapsed()?;
        if elapsed >= self.limit {
            tracing::warn!(
                elapsed_secs = elapsed.as_secs(),
                limit_secs = self.limit.as_secs(),
                "Run exceeded its time budget"
            );
            return Err(Error::Timeout {
                elapsed,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
