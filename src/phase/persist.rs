//! VALIDATING and PERSISTING: schema check, duplicate suppression, batched writes with a
//! checkpoint after every batch.

use crate::batch::BatchProcessor;
use crate::error::{Error, Result};
use crate::error_log::{ErrorCode, ErrorContext};
use crate::records::ImportRecord;
use crate::repository::Repository;
use crate::validation::{ValidationBatch, ValidationContext};
use std::collections::HashSet;

use super::{PhaseOutcome, PhaseRunner};

/// Records returned for one page
pub(super) struct FetchedPage<R> {
    pub(super) page: u32,
    pub(super) records: Vec<R>,
}

impl<'a, R, S> PhaseRunner<'a, R, S>
where
    R: ImportRecord,
    S: Repository<R> + ?Sized,
{
    /// Keep the records that pass the schema check and are not known yet
    ///
    /// Every record lands in exactly one of valid, invalid or duplicate. Counts are merged
    /// into the run's tracker once, after all pages were examined.
    pub(super) async fn validate(&self, pages: Vec<FetchedPage<R>>) -> Vec<R> {
        let mut counts = ValidationBatch::new();
        let mut accepted = Vec::new();
        let mut queued = HashSet::new();

        for FetchedPage { page, records } in pages {
            for record in records {
                let key = record.natural_key();

                if let Err(message) = record.validate() {
                    let entity_id = (!key.is_empty()).then(|| key.clone());
                    self.ctx.errors().log(
                        format!("invalid {}: {message}", R::ENTITY),
                        ErrorCode::ValidationFailed,
                        ErrorContext {
                            entity_id: entity_id.clone(),
                            ..ErrorContext::phase(R::PHASE)
                        }
                        .with_page(page)
                        .with_entity_type(R::ENTITY),
                        false,
                    );
                    counts.invalid(
                        R::ENTITY,
                        message,
                        ValidationContext {
                            phase: Some(R::PHASE),
                            page: Some(page),
                            entity_id,
                        },
                    );
                    continue;
                }

                let already_processed = self.ctx.with_tracker(|t| t.was_processed(&key));
                if already_processed || queued.contains(&key) || self.exists_in_store(&key, page).await
                {
                    counts.duplicate();
                    continue;
                }

                queued.insert(key);
                counts.valid(R::ENTITY);
                accepted.push(record);
            }
        }

        tracing::debug!(
            phase = %R::PHASE,
            examined = counts.total(),
            accepted = accepted.len(),
            "Records validated"
        );
        self.ctx.validation().merge(&counts);
        accepted
    }

    async fn exists_in_store(&self, key: &str, page: u32) -> bool {
        match self.repository.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                // the insert skips existing keys anyway
                tracing::warn!(phase = %R::PHASE, key, error = %e, "Duplicate lookup failed");
                self.ctx.errors().log(
                    format!("duplicate lookup failed for {key}: {e}"),
                    ErrorCode::PersistFailed,
                    ErrorContext {
                        entity_id: Some(key.to_string()),
                        ..ErrorContext::phase(R::PHASE)
                    }
                    .with_page(page)
                    .with_entity_type(R::ENTITY)
                    .with_operation("exists"),
                    false,
                );
                false
            }
        }
    }

    /// Write `records` in batches, checkpointing after each one
    pub(super) async fn persist(&self, records: &[R], outcome: &mut PhaseOutcome) -> Result<()> {
        let processor = BatchProcessor::new(self.ctx.config().batch_size_for(R::PHASE));
        if records.is_empty() {
            return Ok(());
        }

        let metrics = processor.metrics::<R>(records.len());
        tracing::debug!(
            phase = %R::PHASE,
            records = metrics.total_records,
            batches = metrics.total_batches,
            batch_size = metrics.batch_size,
            "Persisting records"
        );

        let persisted_before = self.ctx.records_persisted();
        let result = processor
            .process(records, |batch, index, total| async move {
                self.write_batch(batch, index, total).await
            })
            .await;

        outcome.records_persisted += self.ctx.records_persisted() - persisted_before;
        result?;
        outcome.batches_written += metrics.total_batches;
        Ok(())
    }

    async fn write_batch(&self, batch: &[R], index: usize, total: usize) -> Result<()> {
        self.ctx.check_cancelled()?;
        self.ctx.check_timeout()?;

        let batch_index = if self.checkpointing {
            self.ctx.with_tracker(|t| t.batches_completed())
        } else {
            index
        };

        let written = match self.repository.create_many(batch).await {
            Ok(written) => written,
            Err(e) => {
                self.ctx.errors().log(
                    format!("failed to write batch {batch_index}: {e}"),
                    ErrorCode::PersistFailed,
                    ErrorContext::phase(R::PHASE)
                        .with_batch(batch_index)
                        .with_entity_type(R::ENTITY)
                        .with_operation("create_many"),
                    false,
                );
                return Err(Error::phase_fatal(
                    R::PHASE,
                    format!("failed to write batch {batch_index}: {e}"),
                ));
            }
        };
        self.ctx.add_records_persisted(written);

        if !self.checkpointing {
            return Ok(());
        }

        let last_key = batch.last().map(|r| r.natural_key());
        self.ctx.with_tracker(|t| {
            for record in batch {
                t.mark_processed(record.natural_key());
            }
            t.record_batch(last_key, index + 1, total);
        });

        if let Err(e) = self.ctx.save_checkpoint().await {
            tracing::warn!(phase = %R::PHASE, batch_index, error = %e, "Checkpoint save failed");
            self.ctx.errors().log(
                format!("checkpoint after batch {batch_index} not saved: {e}"),
                ErrorCode::CheckpointFailed,
                ErrorContext::phase(R::PHASE)
                    .with_batch(batch_index)
                    .with_operation("save_checkpoint"),
                false,
            );
        }
        Ok(())
    }
}
