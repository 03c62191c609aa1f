//! Error types for federation-import
//!
//! This module provides error handling for the import engine, including:
//! - A top-level [`Error`] covering every failure class the orchestrator distinguishes
//!   (transient source errors, phase-fatal errors, timeout, cancellation)
//! - Database-specific errors ([`DatabaseError`])
//! - Machine-readable error codes used by the error log and the run report

use crate::types::{Phase, RunId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for federation-import operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for federation-import
///
/// Record- and page-level failures are recovered inside the phase runner and only show up
/// in the error log. The variants that escape a phase ([`Error::PhaseFatal`],
/// [`Error::Timeout`], [`Error::Cancelled`]) are the ones the orchestrator turns into a
/// terminal run status.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch.batch_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Extraction source failure (page fetch, session setup)
    ///
    /// Classified as transient or permanent from its message, see [`crate::retry`].
    #[error("source error: {0}")]
    Source(String),

    /// A failure that prevents a phase from running at all
    #[error("phase {phase} failed: {message}")]
    PhaseFatal {
        /// The phase that could not run
        phase: Phase,
        /// What went wrong
        message: String,
    },

    /// The run exceeded its wall-clock budget
    #[error("import timed out after {elapsed:?} (limit {limit:?})")]
    Timeout {
        /// Time elapsed since the run started
        elapsed: Duration,
        /// Configured maximum run duration
        limit: Duration,
    },

    /// The operator cancelled the run
    #[error("import cancelled")]
    Cancelled,

    /// Another import already holds the run lock
    #[error("an import is already running (run {run_id:?})")]
    AlreadyRunning {
        /// The run currently holding the lock, when known
        run_id: Option<RunId>,
    },

    /// Operation requires an active run but none is in progress
    #[error("no import is currently running")]
    NotRunning,

    /// Timeout manager was queried before `start()`
    #[error("timeout manager has not been started")]
    TimerNotStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record or run not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a source error
    pub fn source(message: impl Into<String>) -> Self {
        Error::Source(message.into())
    }

    /// Shorthand for a phase-fatal error
    pub fn phase_fatal(phase: Phase, message: impl Into<String>) -> Self {
        Error::PhaseFatal {
            phase,
            message: message.into(),
        }
    }

    /// Whether this error is the cooperative cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether this error is the run-budget timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Source(_) => "source_error",
            Error::PhaseFatal { .. } => "phase_fatal",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::AlreadyRunning { .. } => "already_running",
            Error::NotRunning => "not_running",
            Error::TimerNotStarted => "timer_not_started",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct_for_terminal_classes() {
        let timeout = Error::Timeout {
            elapsed: Duration::from_secs(10),
            limit: Duration::from_secs(5),
        };
        assert_eq!(timeout.error_code(), "timeout");
        assert_eq!(Error::Cancelled.error_code(), "cancelled");
        assert_eq!(
            Error::phase_fatal(Phase::Games, "no session").error_code(),
            "phase_fatal"
        );
        assert!(timeout.is_timeout());
        assert!(!timeout.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn phase_fatal_message_names_the_phase() {
        let err = Error::phase_fatal(Phase::PlayerYearStats, "cannot open session");
        assert_eq!(
            err.to_string(),
            "phase PLAYER_YEAR_STATS failed: cannot open session"
        );
    }

    #[test]
    fn already_running_carries_run_id() {
        let err = Error::AlreadyRunning {
            run_id: Some(RunId(7)),
        };
        assert!(err.to_string().contains("already running"));
        assert_eq!(err.error_code(), "already_running");
    }

    #[test]
    fn database_errors_share_a_code() {
        let err = Error::Database(DatabaseError::QueryFailed("locked".into()));
        assert_eq!(err.error_code(), "database_error");
        assert_eq!(err.to_string(), "database error: query failed: locked");
    }
}
