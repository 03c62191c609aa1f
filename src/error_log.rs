//! Structured log of non-fatal failures
//!
//! Page skips, failed batch writes and checkpoint write failures are recorded here instead
//! of aborting the phase. `log` never fails and never panics, so call sites can use it from
//! any recovery path.

use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

const RECENT_ENTRIES: usize = 20;

/// Failure class of an error log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A page fetch failed (possibly retried)
    FetchFailed,
    /// A page was skipped after its retries were exhausted
    PageSkipped,
    /// A record failed its schema check
    ValidationFailed,
    /// A batch could not be written
    PersistFailed,
    /// A checkpoint could not be written
    CheckpointFailed,
    /// A source session could not be opened
    SessionFailed,
    /// Integrity scan could not run
    IntegrityFailed,
    /// The run exceeded its time budget
    Timeout,
    /// Anything else
    Unknown,
}

impl ErrorCode {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::PageSkipped => "PAGE_SKIPPED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::PersistFailed => "PERSIST_FAILED",
            ErrorCode::CheckpointFailed => "CHECKPOINT_FAILED",
            ErrorCode::SessionFailed => "SESSION_FAILED",
            ErrorCode::IntegrityFailed => "INTEGRITY_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure happened
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Phase in progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Source page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Batch being written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    /// Natural key of the affected record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Record type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Operation that failed, e.g. "fetch_page"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl ErrorContext {
    /// Context naming a phase
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    /// Add the source page
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Add the batch index
    pub fn with_batch(mut self, batch_index: usize) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    /// Add the record type
    pub fn with_entity_type(mut self, entity_type: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self
    }

    /// Add the operation name
    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }
}

/// One logged failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// Failure class
    pub code: ErrorCode,
    /// Error message
    pub message: String,
    /// Phase in progress
    pub phase: Option<Phase>,
    /// Where it happened
    pub context: ErrorContext,
    /// When it was logged
    pub timestamp: DateTime<Utc>,
    /// Whether the operation is retried after this failure
    pub will_retry: bool,
}

/// Aggregated view of the log
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Entries logged
    pub total: usize,
    /// Entries per phase (entries without a phase are not counted here)
    pub by_phase: BTreeMap<Phase, usize>,
    /// Entries per code
    pub by_code: BTreeMap<ErrorCode, usize>,
    /// Entries that were not followed by a retry
    pub critical: usize,
    /// Entries that were followed by a retry
    pub retried: usize,
    /// Most recent entries, oldest first
    pub recent: Vec<ErrorLogEntry>,
}

/// Append-only, per-run error log
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl ErrorLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn log(&self, message: impl Into<String>, code: ErrorCode, context: ErrorContext, will_retry: bool) {
        let message = message.into();
        if will_retry {
            tracing::debug!(code = %code, phase = ?context.phase, error = %message, "Recoverable failure");
        } else {
            tracing::warn!(code = %code, phase = ?context.phase, error = %message, "Failure recorded");
        }

        let entry = ErrorLogEntry {
            code,
            message,
            phase: context.phase,
            context,
            timestamp: Utc::now(),
            will_retry,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Turn retried `code` entries for `pages` of `phase` into critical ones
    ///
    /// For failures that were logged with a retry that is not going to happen. Returns
    /// the number of entries changed.
    pub fn mark_critical(&self, code: ErrorCode, phase: Phase, pages: &[u32]) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;
        for entry in entries.iter_mut().filter(|e| {
            e.will_retry
                && e.code == code
                && e.phase == Some(phase)
                && e.context.page.is_some_and(|page| pages.contains(&page))
        }) {
            entry.will_retry = false;
            changed += 1;
        }
        changed
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was logged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Message of the most recent entry
    pub fn last_message(&self) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|e| e.message.clone())
    }

    /// Totals per phase and code plus the critical/retried split
    pub fn summary(&self) -> ErrorSummary {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = ErrorSummary {
            total: entries.len(),
            ..ErrorSummary::default()
        };
        for entry in entries.iter() {
            if let Some(phase) = entry.phase {
                *summary.by_phase.entry(phase).or_default() += 1;
            }
            *summary.by_code.entry(entry.code).or_default() += 1;
            if entry.will_retry {
                summary.retried += 1;
            } else {
                summary.critical += 1;
            }
        }
        let skip = entries.len().saturating_sub(RECENT_ENTRIES);
        summary.recent = entries.iter().skip(skip).cloned().collect();
        summary
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_groups_by_phase_and_code() {
        let log = ErrorLog::new();
        log.log(
            "HTTP 503",
            ErrorCode::FetchFailed,
            ErrorContext::phase(Phase::Players).with_page(3),
            true,
        );
        log.log(
            "HTTP 503",
            ErrorCode::PageSkipped,
            ErrorContext::phase(Phase::Players).with_page(3),
            false,
        );
        log.log(
            "disk I/O error",
            ErrorCode::PersistFailed,
            ErrorContext::phase(Phase::Games).with_batch(4),
            false,
        );
        log.log("unknown", ErrorCode::Unknown, ErrorContext::default(), false);

        let summary = log.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_phase[&Phase::Players], 2);
        assert_eq!(summary.by_phase[&Phase::Games], 1);
        assert_eq!(summary.by_code[&ErrorCode::PageSkipped], 1);
        assert_eq!(summary.critical, 3);
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.critical + summary.retried, summary.total);
    }

    #[test]
    fn recent_keeps_the_tail() {
        let log = ErrorLog::new();
        for i in 0..(RECENT_ENTRIES + 5) {
            log.log(format!("error {i}"), ErrorCode::FetchFailed, ErrorContext::default(), false);
        }

        let summary = log.summary();
        assert_eq!(summary.recent.len(), RECENT_ENTRIES);
        assert_eq!(summary.recent[0].message, "error 5");
        assert_eq!(
            log.last_message().as_deref(),
            Some(format!("error {}", RECENT_ENTRIES + 4).as_str())
        );
    }

    #[test]
    fn entries_carry_their_context() {
        let log = ErrorLog::new();
        let context = ErrorContext::phase(Phase::Statistics)
            .with_batch(2)
            .with_entity_type("game_statistic")
            .with_operation("create_many");
        log.log("constraint failed", ErrorCode::PersistFailed, context.clone(), false);

        let entry = &log.summary().recent[0];
        assert_eq!(entry.phase, Some(Phase::Statistics));
        assert_eq!(entry.context, context);
        assert!(!entry.will_retry);
    }

    #[test]
    fn mark_critical_only_touches_matching_pages() {
        let log = ErrorLog::new();
        let page = |p| ErrorContext::phase(Phase::Players).with_page(p);
        log.log("page 1 skipped", ErrorCode::PageSkipped, page(1), true);
        log.log("page 2 skipped", ErrorCode::PageSkipped, page(2), true);
        log.log("page 1 fetch", ErrorCode::FetchFailed, page(1), true);
        log.log(
            "page 1 skipped",
            ErrorCode::PageSkipped,
            ErrorContext::phase(Phase::Clubs).with_page(1),
            true,
        );

        assert_eq!(log.mark_critical(ErrorCode::PageSkipped, Phase::Players, &[1, 3]), 1);
        // already critical
        assert_eq!(log.mark_critical(ErrorCode::PageSkipped, Phase::Players, &[1]), 0);

        let summary = log.summary();
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.retried, 3);
    }

    #[test]
    fn summary_serializes_codes_by_name() {
        let log = ErrorLog::new();
        log.log("x", ErrorCode::CheckpointFailed, ErrorContext::phase(Phase::Clubs), false);

        let json = serde_json::to_value(log.summary()).unwrap();
        assert_eq!(json["by_code"]["CHECKPOINT_FAILED"], 1);
        assert_eq!(json["by_phase"]["CLUBS"], 1);
    }
}
