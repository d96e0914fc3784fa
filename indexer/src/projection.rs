//! Projection store
//!
//! SQLite mirror of the ledger, written only by the reconciler. Rows are
//! inserted or appended to and never rewritten retroactively, so readers can
//! query concurrently under read-committed isolation.

use crate::error::Result;
use foodsafe_ledger::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS lots (
        lot_id INTEGER PRIMARY KEY,
        product_name TEXT NOT NULL,
        origin TEXT NOT NULL,
        producer TEXT NOT NULL,
        current_owner TEXT NOT NULL,
        status TEXT NOT NULL,
        is_recalled BOOLEAN NOT NULL DEFAULT 0,
        created_block INTEGER NOT NULL,
        updated_block INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_lots_owner ON lots (current_owner)",
    "CREATE INDEX IF NOT EXISTS idx_lots_status ON lots (status)",
    r#"
    CREATE TABLE IF NOT EXISTS history_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lot_id INTEGER NOT NULL REFERENCES lots (lot_id),
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        actor TEXT NOT NULL,
        evidence_ref TEXT NOT NULL,
        status TEXT NOT NULL,
        event_type TEXT NOT NULL,
        UNIQUE (tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_history_lot ON history_entries (lot_id)",
    r#"
    CREATE TABLE IF NOT EXISTS ownership_transfers (
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        lot_id INTEGER NOT NULL,
        from_address TEXT,
        to_address TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recall_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lot_id INTEGER NOT NULL REFERENCES lots (lot_id),
        regulator TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        UNIQUE (tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recalls_lot ON recall_events (lot_id)",
    r#"
    CREATE TABLE IF NOT EXISTS indexed_events (
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        indexed_at TEXT NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS checkpoint (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_processed_block INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

/// Tables cleared by a reset, children first
pub(crate) const PROJECTION_TABLES: &[&str] = &[
    "history_entries",
    "ownership_transfers",
    "recall_events",
    "indexed_events",
    "lots",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LotRow {
    pub lot_id: i64,
    pub product_name: String,
    pub origin: String,
    pub producer: String,
    pub current_owner: String,
    pub status: String,
    pub is_recalled: bool,
    pub created_block: i64,
    pub updated_block: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub lot_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub evidence_ref: String,
    pub status: String,
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct RecallRow {
    pub id: i64,
    pub lot_id: i64,
    pub regulator: String,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct TransferRow {
    pub tx_hash: String,
    pub log_index: i64,
    pub lot_id: i64,
    pub from_address: Option<String>,
    pub to_address: String,
    pub block_number: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectionStats {
    pub total_lots: i64,
    pub recalled_lots: i64,
    pub by_status: Vec<(String, i64)>,
}

/// Handle over the projection database
#[derive(Clone, Debug)]
pub struct Projection {
    pool: SqlitePool,
}

impl Projection {
    /// Connect and create the schema
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every in-memory connection is its own database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        let projection = Self { pool };
        projection.migrate().await?;

        tracing::info!(url = %database_url, "Projection store ready");

        Ok(projection)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn lot(&self, lot_id: u64) -> Result<Option<LotRow>> {
        let lot = sqlx::query_as::<_, LotRow>("SELECT * FROM lots WHERE lot_id = ?")
            .bind(lot_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lot)
    }

    pub async fn lots(&self, offset: u32, limit: u32) -> Result<Vec<LotRow>> {
        let lots = sqlx::query_as::<_, LotRow>(
            "SELECT * FROM lots ORDER BY lot_id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(lots)
    }

    pub async fn lots_by_owner(&self, owner: &str) -> Result<Vec<LotRow>> {
        let lots = sqlx::query_as::<_, LotRow>(
            "SELECT * FROM lots WHERE current_owner = ? ORDER BY lot_id",
        )
        .bind(Address::new(owner).as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(lots)
    }

    /// History rows of a lot in log order
    pub async fn history(&self, lot_id: u64) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT * FROM history_entries
            WHERE lot_id = ?
            ORDER BY block_number, log_index
            "#,
        )
        .bind(lot_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn transfers(&self, lot_id: u64) -> Result<Vec<TransferRow>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT * FROM ownership_transfers
            WHERE lot_id = ?
            ORDER BY block_number, log_index
            "#,
        )
        .bind(lot_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent recalls first
    pub async fn recalls(&self, offset: u32, limit: u32) -> Result<Vec<RecallRow>> {
        let rows = sqlx::query_as::<_, RecallRow>(
            r#"
            SELECT * FROM recall_events
            ORDER BY block_number DESC, log_index DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn recalls_for_lot(&self, lot_id: u64) -> Result<Vec<RecallRow>> {
        let rows = sqlx::query_as::<_, RecallRow>(
            "SELECT * FROM recall_events WHERE lot_id = ? ORDER BY block_number, log_index",
        )
        .bind(lot_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `None` when the lot is not projected
    pub async fn is_recalled(&self, lot_id: u64) -> Result<Option<bool>> {
        let flag = sqlx::query_scalar::<_, bool>("SELECT is_recalled FROM lots WHERE lot_id = ?")
            .bind(lot_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(flag)
    }

    pub async fn stats(&self) -> Result<ProjectionStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_lots,
                   COALESCE(SUM(CASE WHEN is_recalled THEN 1 ELSE 0 END), 0) AS recalled_lots
            FROM lots
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_status = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM lots GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| Ok((r.try_get("status")?, r.try_get("count")?)))
        .collect::<std::result::Result<Vec<(String, i64)>, sqlx::Error>>()?;

        Ok(ProjectionStats {
            total_lots: row.try_get("total_lots")?,
            recalled_lots: row.try_get("recalled_lots")?,
            by_status,
        })
    }

    /// Number of applied dedup records
    pub async fn indexed_event_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM indexed_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
