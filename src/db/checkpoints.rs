//! The singleton checkpoint record.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::DatabaseError;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{CHECKPOINT_KEY, Database};

impl Database {
    /// Overwrite the stored checkpoint
    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = serde_json::to_string(checkpoint)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO checkpoints (key, phase, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                phase = excluded.phase,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(CHECKPOINT_KEY)
        .bind(checkpoint.current_phase.as_str())
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save checkpoint: {}",
                e
            )))
        })?;

        tracing::debug!(
            phase = %checkpoint.current_phase,
            batch_index = checkpoint.current_batch_index,
            processed = checkpoint.processed_ids.len(),
            progress = checkpoint.progress_percent,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load the stored checkpoint
    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM checkpoints WHERE key = ?")
                .bind(CHECKPOINT_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to load checkpoint: {}",
                        e
                    )))
                })?;

        payload
            .map(|p| {
                serde_json::from_str::<Checkpoint>(&p).map_err(|e| {
                    Error::Database(DatabaseError::Corrupt(format!(
                        "Unreadable checkpoint: {}",
                        e
                    )))
                })
            })
            .transpose()
    }

    /// Delete the stored checkpoint
    pub async fn clear_checkpoint(&self) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE key = ?")
            .bind(CHECKPOINT_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear checkpoint: {}",
                    e
                )))
            })?;

        tracing::debug!("Checkpoint cleared");
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for Database {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.save_checkpoint(checkpoint).await
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        self.load_checkpoint().await
    }

    async fn clear(&self) -> Result<()> {
        self.clear_checkpoint().await
    }
}
