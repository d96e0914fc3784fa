use crate::error::{IndexerError, Result};
use crate::projection::PROJECTION_TABLES;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

/// CheckpointManager persists the last fully applied block
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    pool: SqlitePool,
}

impl CheckpointManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint row if missing and return its value
    ///
    /// A fresh checkpoint sits one block before `start_block`.
    pub async fn load_or_init(&self, start_block: u64) -> Result<u64> {
        let current = self.ensure(start_block).await?;
        info!(checkpoint = current, "Checkpoint loaded");
        Ok(current)
    }

    /// Current checkpoint, recreating the row at `start_block - 1` if it was dropped
    pub async fn ensure(&self, start_block: u64) -> Result<u64> {
        let initial = start_block.saturating_sub(1);

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO checkpoint (id, last_processed_block, updated_at)
            VALUES (1, ?, ?)
            "#,
        )
        .bind(initial as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.current().await
    }

    pub async fn current(&self) -> Result<u64> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT last_processed_block FROM checkpoint WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        match block {
            Some(b) => Ok(b as u64),
            None => Err(IndexerError::Consistency(
                "checkpoint row missing".to_string(),
            )),
        }
    }

    /// Move the checkpoint inside the caller's transaction
    pub async fn advance(&self, tx: &mut Transaction<'_, Sqlite>, block: u64) -> Result<()> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT last_processed_block FROM checkpoint WHERE id = 1")
                .fetch_optional(&mut **tx)
                .await?;

        let current = current
            .ok_or_else(|| IndexerError::Consistency("checkpoint row missing".to_string()))?
            as u64;

        if block < current {
            return Err(IndexerError::Consistency(format!(
                "checkpoint would move backwards from {} to {}",
                current, block
            )));
        }

        sqlx::query("UPDATE checkpoint SET last_processed_block = ?, updated_at = ? WHERE id = 1")
            .bind(block as i64)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await?;

        debug!(from = current, to = block, "Checkpoint advanced");
        Ok(())
    }

    /// Clear the checkpoint and every projection row
    ///
    /// The next `load_or_init` starts over from the configured start block.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in PROJECTION_TABLES {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM checkpoint").execute(&mut *tx).await?;

        tx.commit().await?;

        warn!("Projection and checkpoint reset");
        Ok(())
    }
}
