//! Reconciler
//!
//! Applies decoded windows to the projection. Every event first claims its
//! `(tx_hash, log_index)` dedup record; an already claimed key with the same
//! payload is skipped, so replaying a window after a crash has no effect.
//! The events of a window and the checkpoint advance share one SQL
//! transaction.

use crate::{
    checkpoint::CheckpointManager,
    error::{IndexerError, Result},
    reader::{DecodedEvent, Window},
};
use chrono::Utc;
use foodsafe_ledger::event::{LotRecalled, LotRegistered, LotStatusUpdated, OwnershipTransferred};
use foodsafe_ledger::{EvidenceRef, LedgerEvent, LotStatus};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// Counts produced by one application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub duplicates: usize,
}

impl ApplyOutcome {
    fn merge(&mut self, fresh: bool) {
        if fresh {
            self.applied += 1;
        } else {
            self.duplicates += 1;
        }
    }
}

/// Single writer of the projection
#[derive(Clone, Debug)]
pub struct Reconciler {
    pool: SqlitePool,
    checkpoints: CheckpointManager,
}

impl Reconciler {
    pub fn new(pool: SqlitePool) -> Self {
        let checkpoints = CheckpointManager::new(pool.clone());
        Self { pool, checkpoints }
    }

    /// Apply a window and advance the checkpoint to its upper bound
    pub async fn apply_window(&self, window: Window, events: &[DecodedEvent]) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut outcome = ApplyOutcome::default();
        for event in events {
            outcome.merge(apply_event(&mut tx, event).await?);
        }
        self.checkpoints.advance(&mut tx, window.to).await?;

        tx.commit().await?;

        info!(
            window = %window,
            applied = outcome.applied,
            duplicates = outcome.duplicates,
            "Window committed"
        );

        Ok(outcome)
    }

    /// Apply events without touching the checkpoint
    ///
    /// Leaves the projection as a crash between event writes and the
    /// checkpoint update would.
    pub async fn apply_events(&self, events: &[DecodedEvent]) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut outcome = ApplyOutcome::default();
        for event in events {
            outcome.merge(apply_event(&mut tx, event).await?);
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

/// Returns `false` when the event was already applied
async fn apply_event(tx: &mut Transaction<'_, Sqlite>, decoded: &DecodedEvent) -> Result<bool> {
    if !claim(tx, decoded).await? {
        debug!(key = %decoded.key, "Duplicate event skipped");
        return Ok(false);
    }

    match &decoded.event {
        LedgerEvent::OwnershipTransferred(e) => {
            apply_transfer(tx, decoded, e).await?
        }
        LedgerEvent::LotRegistered(e) => {
            apply_registration(tx, decoded, e).await?
        }
        LedgerEvent::LotStatusUpdated(e) => {
            apply_status_update(tx, decoded, e).await?
        }
        LedgerEvent::LotRecalled(e) => apply_recall(tx, decoded, e).await?,
        other => {
            return Err(IndexerError::Decode(format!(
                "{} is not a projected event",
                other.kind().name()
            )))
        }
    }

    debug!(
        key = %decoded.key,
        kind = decoded.event.kind().name(),
        "Event applied"
    );
    Ok(true)
}

/// Insert the dedup record; `false` if an identical one exists
async fn claim(tx: &mut Transaction<'_, Sqlite>, decoded: &DecodedEvent) -> Result<bool> {
    let payload = serde_json::to_string(&decoded.event)?;
    let tx_hash = decoded.key.tx_hash.to_hex();

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO indexed_events
            (tx_hash, log_index, block_number, event_type, payload, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&tx_hash)
    .bind(decoded.key.log_index as i64)
    .bind(decoded.position.block as i64)
    .bind(decoded.event.kind().name())
    .bind(&payload)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(true);
    }

    let stored: String = sqlx::query_scalar(
        "SELECT payload FROM indexed_events WHERE tx_hash = ? AND log_index = ?",
    )
    .bind(&tx_hash)
    .bind(decoded.key.log_index as i64)
    .fetch_one(&mut **tx)
    .await?;

    if stored != payload {
        return Err(IndexerError::Consistency(format!(
            "event {} already applied with a different payload",
            decoded.key
        )));
    }

    Ok(false)
}

async fn lot_exists(tx: &mut Transaction<'_, Sqlite>, lot_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT lot_id FROM lots WHERE lot_id = ?")
        .bind(lot_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}

async fn require_lot(tx: &mut Transaction<'_, Sqlite>, decoded: &DecodedEvent, lot_id: i64) -> Result<()> {
    if lot_exists(tx, lot_id).await? {
        Ok(())
    } else {
        Err(IndexerError::Consistency(format!(
            "event {} references lot {} which is not projected",
            decoded.key, lot_id
        )))
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    decoded: &DecodedEvent,
    lot_id: i64,
    actor: &str,
    evidence_ref: &str,
    status: LotStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history_entries
            (lot_id, tx_hash, log_index, block_number, timestamp, actor, evidence_ref, status, event_type)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lot_id)
    .bind(decoded.key.tx_hash.to_hex())
    .bind(decoded.key.log_index as i64)
    .bind(decoded.position.block as i64)
    .bind(decoded.timestamp)
    .bind(actor)
    .bind(evidence_ref)
    .bind(status.as_str())
    .bind(decoded.event.kind().name())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn apply_transfer(
    tx: &mut Transaction<'_, Sqlite>,
    decoded: &DecodedEvent,
    event: &OwnershipTransferred,
) -> Result<()> {
    let lot_id = event.lot_id.get() as i64;

    sqlx::query(
        r#"
        INSERT INTO ownership_transfers
            (tx_hash, log_index, lot_id, from_address, to_address, block_number)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(decoded.key.tx_hash.to_hex())
    .bind(decoded.key.log_index as i64)
    .bind(lot_id)
    .bind(event.from.as_ref().map(|a| a.as_str().to_string()))
    .bind(event.to.as_str())
    .bind(decoded.position.block as i64)
    .execute(&mut **tx)
    .await?;

    // Mint transfers precede the lot row
    if event.from.is_none() {
        return Ok(());
    }
    require_lot(tx, decoded, lot_id).await?;

    sqlx::query("UPDATE lots SET current_owner = ?, updated_block = ? WHERE lot_id = ?")
        .bind(event.to.as_str())
        .bind(decoded.position.block as i64)
        .bind(lot_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn apply_registration(
    tx: &mut Transaction<'_, Sqlite>,
    decoded: &DecodedEvent,
    event: &LotRegistered,
) -> Result<()> {
    let lot_id = event.lot_id.get() as i64;
    if lot_exists(tx, lot_id).await? {
        return Err(IndexerError::Consistency(format!(
            "lot {} registered twice (event {})",
            lot_id, decoded.key
        )));
    }

    let block = decoded.position.block as i64;
    sqlx::query(
        r#"
        INSERT INTO lots
            (lot_id, product_name, origin, producer, current_owner, status, is_recalled,
             created_block, updated_block)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(lot_id)
    .bind(&event.product_name)
    .bind(&event.origin)
    .bind(event.producer.as_str())
    .bind(event.producer.as_str())
    .bind(LotStatus::Created.as_str())
    .bind(block)
    .bind(block)
    .execute(&mut **tx)
    .await?;

    insert_history(
        tx,
        decoded,
        lot_id,
        event.producer.as_str(),
        event.evidence_ref.as_str(),
        LotStatus::Created,
    )
    .await
}

async fn apply_status_update(
    tx: &mut Transaction<'_, Sqlite>,
    decoded: &DecodedEvent,
    event: &LotStatusUpdated,
) -> Result<()> {
    let lot_id = event.lot_id.get() as i64;
    require_lot(tx, decoded, lot_id).await?;

    insert_history(
        tx,
        decoded,
        lot_id,
        event.updater.as_str(),
        event.evidence_ref.as_str(),
        event.new_status,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE lots
        SET status = ?, current_owner = ?, updated_block = ?,
            is_recalled = (is_recalled OR ?)
        WHERE lot_id = ?
        "#,
    )
    .bind(event.new_status.as_str())
    .bind(event.updater.as_str())
    .bind(decoded.position.block as i64)
    .bind(event.new_status == LotStatus::Recalled)
    .bind(lot_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn apply_recall(
    tx: &mut Transaction<'_, Sqlite>,
    decoded: &DecodedEvent,
    event: &LotRecalled,
) -> Result<()> {
    let lot_id = event.lot_id.get() as i64;
    require_lot(tx, decoded, lot_id).await?;

    insert_history(
        tx,
        decoded,
        lot_id,
        event.regulator.as_str(),
        EvidenceRef::RECALL_SENTINEL,
        LotStatus::Recalled,
    )
    .await?;

    sqlx::query(
        r#"
        INSERT INTO recall_events (lot_id, regulator, timestamp, tx_hash, log_index, block_number)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lot_id)
    .bind(event.regulator.as_str())
    .bind(decoded.timestamp)
    .bind(decoded.key.tx_hash.to_hex())
    .bind(decoded.key.log_index as i64)
    .bind(decoded.position.block as i64)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "UPDATE lots SET status = ?, is_recalled = 1, updated_block = ? WHERE lot_id = ?",
    )
    .bind(LotStatus::Recalled.as_str())
    .bind(decoded.position.block as i64)
    .bind(lot_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
