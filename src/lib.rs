//! # federation-import
//!
//! Resumable import engine for federation records: clubs, players, tournaments, games and
//! their statistics, pulled page by page from a slow, rate-limited web source into SQLite.
//!
//! ## Design Philosophy
//!
//! federation-import is designed to be:
//! - **Resumable** - Progress is checkpointed after every batch; a crashed, failed or
//!   cancelled run continues where it stopped
//! - **Polite** - Every source call is paced and transient failures back off exponentially
//! - **Tolerant** - A broken page or record is logged and skipped, never fatal for the run
//! - **Library-first** - No CLI or UI; embedding applications drive the run control surface
//!
//! Parsing the source is not part of this crate. Callers plug in one [`PageSource`] per
//! phase that returns typed records for a page.
//!
//! ## Quick Start
//!
//! ```no_run
//! use federation_import::{ImportConfig, ImportSources, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(ImportConfig::default()).await?;
//!
//!     let sources = ImportSources::new(); // one PageSource per phase
//!     let run = orchestrator.run(&sources).await?;
//!     println!("run {} finished: {}", run.id, run.status);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Fixed-size sequential batching
pub mod batch;
/// Resumable progress state
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Structured log of recovered failures
pub mod error_log;
/// Post-run referential integrity checks
pub mod integrity;
/// Run lifecycle and phase sequencing
pub mod orchestrator;
/// Generic phase runner
pub mod phase;
/// Pacing of source calls
pub mod rate_limiter;
/// Typed import records
pub mod records;
/// Structured run report
pub mod report;
/// Persistence interface used by phase runners
pub mod repository;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-run state shared by the orchestrator and the phase runners
pub mod run_context;
/// Single-instance run lock
pub mod run_lock;
/// Extraction source interface
pub mod source;
/// Run time budget
pub mod timeout;
/// Core types
pub mod types;
/// Validation counters
pub mod validation;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
pub use config::ImportConfig;
pub use db::Database;
pub use error::{DatabaseError, Error, Result};
pub use error_log::{ErrorCode, ErrorContext, ErrorLog};
pub use integrity::{IntegrityChecker, IntegrityQueries, IntegrityReport, IntegrityStatus};
pub use orchestrator::{Orchestrator, RunRegistry, SharedRegistry};
pub use phase::{PhaseOutcome, PhaseRunner};
pub use records::{
    ChiefJudgeAssignment, Club, ClubMembership, Game, GameResult, GameStatistic, ImportRecord,
    Player, PlayerYearStat, Tournament, TournamentJudge, TournamentParticipation,
};
pub use report::RunReport;
pub use repository::{EntityRepository, Repository};
pub use retry::IsRetryable;
pub use run_context::RunContext;
pub use source::{ImportSources, PageSession, PageSource, SharedSource};
pub use types::{
    ImportRun, Phase, PhaseState, RunId, RunStatus, SkippedPages, StatusSnapshot,
};

/// Cancel the orchestrator's active run when the process is asked to stop.
///
/// Waits for a termination signal, then calls [`Orchestrator::cancel`] so the run ends
/// CANCELLED with its checkpoint saved. Returns the cancelled run, or `None` if no run was
/// active when the signal arrived.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use federation_import::{ImportConfig, ImportSources, Orchestrator, cancel_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(ImportConfig::default()).await?;
///
///     let watcher = orchestrator.clone();
///     tokio::spawn(async move { cancel_on_signal(&watcher).await });
///
///     orchestrator.run(&ImportSources::new()).await?;
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(orchestrator: &Orchestrator) -> Result<Option<RunId>> {
    wait_for_signal().await;
    match orchestrator.cancel().await {
        Ok(run_id) => Ok(Some(run_id)),
        Err(Error::NotRunning) => {
            tracing::info!("No import running, nothing to cancel");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
