//! Validation accounting
//!
//! Every fetched record ends up in exactly one bucket: valid, invalid (failed its schema
//! check) or duplicate (already in the store or already handled this phase). The tracker
//! counts them per run and keeps a bounded sample of invalid-record messages for the
//! report.

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

const MAX_INVALID_SAMPLES: usize = 50;

/// Record counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// Every record seen
    pub total_fetched: u64,
    /// Records that passed all checks
    pub valid_records: u64,
    /// Records that failed their schema check
    pub invalid_records: u64,
    /// Records dropped as already present
    pub duplicates_skipped: u64,
    /// `valid_records / total_fetched`, 0 when nothing was fetched
    pub validation_rate: f64,
}

/// Where an invalid record came from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    /// Phase that fetched the record
    pub phase: Option<Phase>,
    /// Source page
    pub page: Option<u32>,
    /// Natural key, when the record had one
    pub entity_id: Option<String>,
}

/// One rejected record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRecord {
    /// Record type, e.g. "player"
    pub entity: String,
    /// Why it was rejected
    pub message: String,
    /// Where it came from
    pub context: ValidationContext,
}

/// Validation outcome for the run report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Counters
    #[serde(flatten)]
    pub metrics: ValidationMetrics,
    /// Valid record count per entity type
    pub valid_by_entity: BTreeMap<String, u64>,
    /// Invalid record count per entity type
    pub invalid_by_entity: BTreeMap<String, u64>,
    /// Configured floor for `validation_rate`
    pub min_validation_rate: f64,
    /// Rate fell below the floor; informational, never fails the run
    pub degraded: bool,
    /// First rejected records, bounded
    pub invalid_samples: Vec<InvalidRecord>,
}

#[derive(Debug, Default)]
struct TrackerState {
    valid: u64,
    invalid: u64,
    duplicates: u64,
    valid_by_entity: BTreeMap<String, u64>,
    invalid_by_entity: BTreeMap<String, u64>,
    samples: Vec<InvalidRecord>,
}

/// Per-run validation counters
///
/// Counters only grow within a run; `reset()` starts over.
#[derive(Debug)]
pub struct ValidationTracker {
    min_validation_rate: f64,
    state: Mutex<TrackerState>,
}

impl ValidationTracker {
    /// Create a tracker with the degraded-run floor
    pub fn new(min_validation_rate: f64) -> Self {
        Self {
            min_validation_rate,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a record that passed every check
    pub fn record_valid(&self, entity: &str) {
        let mut state = self.lock();
        state.valid += 1;
        *state.valid_by_entity.entry(entity.to_string()).or_default() += 1;
    }

    /// Count a record that failed its schema check
    pub fn record_invalid(&self, entity: &str, message: &str, context: ValidationContext) {
        tracing::debug!(
            entity,
            message,
            phase = ?context.phase,
            page = ?context.page,
            "Record failed validation"
        );
        let mut state = self.lock();
        state.invalid += 1;
        *state.invalid_by_entity.entry(entity.to_string()).or_default() += 1;
        if state.samples.len() < MAX_INVALID_SAMPLES {
            state.samples.push(InvalidRecord {
                entity: entity.to_string(),
                message: message.to_string(),
                context,
            });
        }
    }

    /// Count a record dropped as a duplicate
    pub fn record_duplicate_skipped(&self) {
        self.lock().duplicates += 1;
    }

    /// Fold counts collected elsewhere (e.g. by a worker) into the run totals
    pub fn merge(&self, batch: &ValidationBatch) {
        let mut state = self.lock();
        state.valid += batch.valid.values().sum::<u64>();
        state.duplicates += batch.duplicates;
        for (entity, count) in &batch.valid {
            *state.valid_by_entity.entry(entity.clone()).or_default() += count;
        }
        for invalid in &batch.invalid {
            state.invalid += 1;
            *state
                .invalid_by_entity
                .entry(invalid.entity.clone())
                .or_default() += 1;
            if state.samples.len() < MAX_INVALID_SAMPLES {
                state.samples.push(invalid.clone());
            }
        }
    }

    /// Clear every counter
    pub fn reset(&self) {
        *self.lock() = TrackerState::default();
    }

    /// Current counters
    pub fn metrics(&self) -> ValidationMetrics {
        let state = self.lock();
        metrics_of(&state)
    }

    /// Counters plus the degraded-run check
    pub fn summary(&self) -> ValidationSummary {
        let state = self.lock();
        let metrics = metrics_of(&state);
        ValidationSummary {
            degraded: metrics.total_fetched > 0
                && metrics.validation_rate < self.min_validation_rate,
            metrics,
            valid_by_entity: state.valid_by_entity.clone(),
            invalid_by_entity: state.invalid_by_entity.clone(),
            min_validation_rate: self.min_validation_rate,
            invalid_samples: state.samples.clone(),
        }
    }
}

fn metrics_of(state: &TrackerState) -> ValidationMetrics {
    let total = state.valid + state.invalid + state.duplicates;
    ValidationMetrics {
        total_fetched: total,
        valid_records: state.valid,
        invalid_records: state.invalid,
        duplicates_skipped: state.duplicates,
        validation_rate: if total == 0 {
            0.0
        } else {
            state.valid as f64 / total as f64
        },
    }
}

/// Validation counts gathered locally before being merged into the tracker
#[derive(Clone, Debug, Default)]
pub struct ValidationBatch {
    valid: BTreeMap<String, u64>,
    invalid: Vec<InvalidRecord>,
    duplicates: u64,
}

impl ValidationBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a valid record
    pub fn valid(&mut self, entity: &str) {
        *self.valid.entry(entity.to_string()).or_default() += 1;
    }

    /// Count an invalid record
    pub fn invalid(&mut self, entity: &str, message: impl Into<String>, context: ValidationContext) {
        self.invalid.push(InvalidRecord {
            entity: entity.to_string(),
            message: message.into(),
            context,
        });
    }

    /// Count a duplicate
    pub fn duplicate(&mut self) {
        self.duplicates += 1;
    }

    /// Records counted in this batch
    pub fn total(&self) -> u64 {
        self.valid.values().sum::<u64>() + self.invalid.len() as u64 + self.duplicates
    }
}
