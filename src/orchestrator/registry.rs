//! Per-process registry of active import runs.
//!
//! The registry is an explicit object owned by whatever owns the process lifetime and
//! handed to the [`super::Orchestrator`]. It maps each active run to its cancellation token
//! so a run can be cancelled from anywhere that holds the registry.

use crate::types::{Phase, RunId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// What the registry knows about one active run
#[derive(Clone, Debug)]
pub struct ActiveRun {
    /// Cancels the run when fired
    pub cancel_token: CancellationToken,
    /// When the run was registered
    pub started_at: DateTime<Utc>,
    /// Phase in progress, `None` before the first phase
    pub current_phase: Option<Phase>,
    /// Turns true once the pipeline driving the run has finalized it
    ///
    /// `None` for runs driven step by step through the lifecycle calls.
    pub pipeline: Option<watch::Receiver<bool>>,
}

impl ActiveRun {
    /// Wait until the pipeline driving this run has stopped
    ///
    /// Returns at once for runs without a pipeline. A dropped pipeline counts as stopped.
    pub async fn pipeline_stopped(&self) {
        if let Some(mut done) = self.pipeline.clone() {
            // Err means the sender is gone, which also ends the pipeline
            let _ = done.wait_for(|stopped| *stopped).await;
        }
    }
}

/// Active runs of this process
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, ActiveRun>>,
}

/// Shared handle to a registry
pub type SharedRegistry = Arc<RunRegistry>;

impl RunRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry wrapped in [`Arc`]
    pub fn shared() -> SharedRegistry {
        Arc::new(Self::new())
    }

    /// Track a run that just started
    ///
    /// `pipeline` is the completion signal of the pipeline driving the run, if any.
    pub async fn register(
        &self,
        run_id: RunId,
        cancel_token: CancellationToken,
        pipeline: Option<watch::Receiver<bool>>,
    ) {
        let mut runs = self.runs.lock().await;
        runs.insert(
            run_id,
            ActiveRun {
                cancel_token,
                started_at: Utc::now(),
                current_phase: None,
                pipeline,
            },
        );
        tracing::debug!(run_id = run_id.get(), active = runs.len(), "Run registered");
    }

    /// Record the phase a run entered
    pub async fn set_phase(&self, run_id: RunId, phase: Phase) {
        if let Some(run) = self.runs.lock().await.get_mut(&run_id) {
            run.current_phase = Some(phase);
        }
    }

    /// Fire the token of one run
    ///
    /// Returns false if the run is not registered.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        match self.runs.lock().await.get(&run_id) {
            Some(run) => {
                tracing::debug!(run_id = run_id.get(), "Signaling run cancellation");
                run.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire the token of every registered run
    pub async fn cancel_all(&self) {
        let runs = self.runs.lock().await;
        tracing::debug!(active = runs.len(), "Cancelling all active runs");
        for run in runs.values() {
            run.cancel_token.cancel();
        }
    }

    /// Stop tracking a run that reached a terminal status
    pub async fn remove(&self, run_id: RunId) -> Option<ActiveRun> {
        self.runs.lock().await.remove(&run_id)
    }

    /// Registry entry of one run
    pub async fn get(&self, run_id: RunId) -> Option<ActiveRun> {
        self.runs.lock().await.get(&run_id).cloned()
    }

    /// IDs of all registered runs, sorted
    pub async fn active_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.lock().await.keys().copied().collect();
        ids.sort_by_key(|id| id.get());
        ids
    }

    /// Number of registered runs
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Whether no run is registered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
