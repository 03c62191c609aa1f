//! Database layer for federation-import
//!
//! Handles SQLite persistence for the run history, the current run state, the checkpoint
//! and the imported entities.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`runs`] - Append-only import run history
//! - [`state`] - The singleton current-run record and the run lock built on it
//! - [`checkpoints`] - The singleton checkpoint record
//! - [`entities`] - Entity persistence ([`crate::repository::Repository`] impls, update verbs)
//! - [`integrity`] - Read-only reference scans

use crate::report::RunReport;
use crate::types::{ImportRun, Phase, RunId, RunStatus};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod checkpoints;
mod entities;
mod integrity;
mod migrations;
mod runs;
mod state;

pub use entities::{PlayerUpdate, TournamentUpdate};
pub use state::LockAcquisition;

/// Key of the singleton run-state row
pub(crate) const CURRENT_STATE_KEY: &str = "current";

/// Key of the singleton checkpoint row
pub(crate) const CHECKPOINT_KEY: &str = "import";

/// Import run record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    /// Unique database ID
    pub id: i64,
    /// Status string (see [`RunStatus::as_str`])
    pub status: String,
    /// Unix timestamp when the run started
    pub started_at: i64,
    /// Unix timestamp when the run reached a terminal status
    pub ended_at: Option<i64>,
    /// Records written during the run
    pub records_processed: i64,
    /// Last phase entered
    pub current_phase: Option<String>,
    /// JSON-encoded [`RunReport`]
    pub error_payload: Option<String>,
}

impl From<RunRow> for ImportRun {
    fn from(row: RunRow) -> Self {
        let report = row.error_payload.as_deref().and_then(|payload| {
            serde_json::from_str::<RunReport>(payload)
                .map_err(|e| {
                    tracing::warn!(run_id = row.id, error = %e, "Ignoring unreadable run report");
                })
                .ok()
        });

        ImportRun {
            id: RunId(row.id),
            status: RunStatus::from_db(&row.status),
            started_at: from_timestamp(row.started_at),
            ended_at: row.ended_at.map(from_timestamp),
            records_processed: row.records_processed.max(0) as u64,
            current_phase: row.current_phase.and_then(|p| p.parse::<Phase>().ok()),
            report,
        }
    }
}

/// Current-run state record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RunStateRow {
    /// Run holding (or last holding) the lock
    pub run_id: Option<i64>,
    /// Status string
    pub status: String,
    /// Phase in progress
    pub current_phase: Option<String>,
    /// Coarse progress (0-100)
    pub progress: i64,
    /// Description of the current step
    pub current_operation: Option<String>,
    /// Last error recorded for the run
    pub last_error: Option<String>,
    /// Unix timestamp when the lock was taken, NULL when free
    pub locked_at: Option<i64>,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

/// Decoded current-run state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Run holding (or last holding) the lock
    pub run_id: Option<RunId>,
    /// Status of that run
    pub status: RunStatus,
    /// Phase in progress
    pub current_phase: Option<Phase>,
    /// Coarse progress (0-100)
    pub progress: u8,
    /// Description of the current step
    pub current_operation: Option<String>,
    /// Last error recorded for the run
    pub last_error: Option<String>,
    /// When the lock was taken, `None` when free
    pub locked_at: Option<DateTime<Utc>>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl From<RunStateRow> for RunState {
    fn from(row: RunStateRow) -> Self {
        RunState {
            run_id: row.run_id.map(RunId),
            status: RunStatus::from_db(&row.status),
            current_phase: row.current_phase.and_then(|p| p.parse::<Phase>().ok()),
            progress: row.progress.clamp(0, 100) as u8,
            current_operation: row.current_operation,
            last_error: row.last_error,
            locked_at: row.locked_at.map(from_timestamp),
            updated_at: from_timestamp(row.updated_at),
        }
    }
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for federation-import
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
