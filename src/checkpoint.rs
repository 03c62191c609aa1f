//! Resumable progress state
//!
//! A [`Checkpoint`] records how far the phase currently in progress got: which phase, how
//! many batches were written, and the natural keys of every record already handled. It is
//! overwritten after every batch and deleted only after a fully successful run, so a crash,
//! a timeout or a cancellation all leave enough behind to resume.
//!
//! During a phase the [`CheckpointTracker`] keeps the processed keys in a `HashSet` for
//! O(1) duplicate checks and produces the snapshots that get saved.

use crate::error::Result;
use crate::types::Phase;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};

/// Persisted progress marker for the phase in progress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Phase that was running when the checkpoint was written
    pub current_phase: Phase,
    /// Batches of `current_phase` already written; the next batch gets this index
    pub current_batch_index: usize,
    /// Natural key of the last record written
    pub last_processed_id: Option<String>,
    /// Natural keys of every record of `current_phase` already handled
    pub processed_ids: BTreeSet<String>,
    /// Progress through the batches of the current pass (0-100)
    pub progress_percent: u8,
    /// When the checkpoint was written
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Empty checkpoint at the start of a phase
    pub fn new(phase: Phase) -> Self {
        Self {
            current_phase: phase,
            current_batch_index: 0,
            last_processed_id: None,
            processed_ids: BTreeSet::new(),
            progress_percent: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Storage for the single current checkpoint
///
/// `save` is last-write-wins and idempotent.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Overwrite the stored checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// The stored checkpoint, if any
    async fn load(&self) -> Result<Option<Checkpoint>>;

    /// Delete the stored checkpoint
    async fn clear(&self) -> Result<()>;
}

/// Checkpoint store kept in process memory
///
/// Useful for embedding without a database and in tests; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(checkpoint.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// `done / total` as a percentage, rounded half up
///
/// Returns 100 for an empty total. 2 of 3 batches is 67%.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total);
    ((done * 100 + total / 2) / total) as u8
}

/// In-memory progress of the phase in progress
#[derive(Clone, Debug)]
pub struct CheckpointTracker {
    phase: Phase,
    processed: HashSet<String>,
    batches_completed: usize,
    last_processed_id: Option<String>,
    progress_percent: u8,
}

impl CheckpointTracker {
    /// Fresh tracker for a phase
    pub fn for_phase(phase: Phase) -> Self {
        Self {
            phase,
            processed: HashSet::new(),
            batches_completed: 0,
            last_processed_id: None,
            progress_percent: 0,
        }
    }

    /// Tracker rehydrated from a saved checkpoint
    pub fn resume_from(checkpoint: &Checkpoint) -> Self {
        Self {
            phase: checkpoint.current_phase,
            processed: checkpoint.processed_ids.iter().cloned().collect(),
            batches_completed: checkpoint.current_batch_index,
            last_processed_id: checkpoint.last_processed_id.clone(),
            progress_percent: checkpoint.progress_percent,
        }
    }

    /// Phase being tracked
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a natural key was already handled in this phase
    pub fn was_processed(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    /// Remember a handled natural key
    ///
    /// Returns false if the key was already known.
    pub fn mark_processed(&mut self, key: impl Into<String>) -> bool {
        self.processed.insert(key.into())
    }

    /// Number of handled keys
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Batches written so far, including those of an earlier, interrupted attempt
    pub fn batches_completed(&self) -> usize {
        self.batches_completed
    }

    /// Account for one written batch
    ///
    /// `done` and `total` describe the current pass and drive the progress percentage.
    pub fn record_batch(&mut self, last_id: Option<String>, done: usize, total: usize) {
        self.batches_completed += 1;
        if last_id.is_some() {
            self.last_processed_id = last_id;
        }
        self.progress_percent = progress_percent(done, total);
    }

    /// Checkpoint reflecting the current state
    pub fn snapshot(&self) -> Checkpoint {
        Checkpoint {
            current_phase: self.phase,
            current_batch_index: self.batches_completed,
            last_processed_id: self.last_processed_id.clone(),
            processed_ids: self.processed.iter().cloned().collect(),
            progress_percent: self.progress_percent,
            updated_at: Utc::now(),
        }
    }
}
