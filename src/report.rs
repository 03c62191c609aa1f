//! Structured run report
//!
//! Stored as JSON on the run row when a run reaches a terminal status. It combines the
//! error log summary, validation outcome, integrity report and skipped-page map, plus the
//! counters of the retry manager, rate limiter and timer.

use crate::error_log::ErrorSummary;
use crate::integrity::IntegrityReport;
use crate::rate_limiter::RateLimiterStats;
use crate::retry::RetryMetrics;
use crate::timeout::TimeoutSummary;
use crate::types::SkippedPages;
use crate::validation::ValidationSummary;
use serde::{Deserialize, Serialize};

/// Error payload of a finished run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Logged failures grouped by phase and code
    pub error_summary: ErrorSummary,
    /// Record counters and degraded flag
    pub validation: ValidationSummary,
    /// Only present after a successful run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    /// Pages still skipped at the end of the run
    pub skipped_pages: SkippedPages,
    /// Retry counters
    pub retry: RetryMetrics,
    /// Rate limiter counters
    pub rate_limiter: RateLimiterStats,
    /// Elapsed time against the budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSummary>,
    /// Error that ended the run, or the last logged failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunReport {
    /// Whether the integrity check ran and found problems
    pub fn has_integrity_issues(&self) -> bool {
        self.integrity.as_ref().is_some_and(|r| !r.passed)
    }
}
