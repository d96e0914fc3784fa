//! Main ledger orchestration layer
//!
//! This module ties together storage, the state machine and the actor
//! into the high-level API used by supply chain participants and by the
//! projection indexer.
//!
//! Mutations go through the single-writer actor. Reads go straight to
//! storage: lot state is visible as soon as its transaction commits, while
//! the event log is only exposed up to the last sealed block.
//!
//! # Example
//!
//! ```no_run
//! use foodsafe_ledger::{Address, Config, EvidenceRef, Ledger, Role};
//!
//! #[tokio::main]
//! async fn main() -> foodsafe_ledger::Result<()> {
//!     let mut config = Config::default();
//!     config.admin = Some("0xadmin".to_string());
//!     let ledger = Ledger::open(config).await?;
//!
//!     let producer = Address::new("0xfarm");
//!     ledger.grant_role(&Address::new("0xadmin"), Role::Producer, &producer).await?;
//!     let lot_id = ledger
//!         .register_lot(&producer, "Organic Lettuce", "Salinas Valley", EvidenceRef::new("hashA"))
//!         .await?;
//!     println!("{:?}", ledger.get_lot(lot_id)?);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, BlockPolicy, LedgerHandle, Receipt},
    event::RawLogEntry,
    metrics::Metrics,
    storage::Storage,
    transition::Command,
    types::{
        Address, BlockHeader, EvidenceRef, HistoryEntry, HistoryPage, Lot, LotId, LotRecord,
        LotStatus, Role, RoleSet,
    },
    Config, Error, Result,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Actor task
    task: JoinHandle<()>,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        let (handle, task) = spawn_ledger_actor(
            storage.clone(),
            metrics.clone(),
            BlockPolicy {
                max_transactions: config.block.max_transactions,
                interval: Duration::from_millis(config.block.interval_ms),
                enabled: config.block.enabled,
            },
        )?;

        if let Some(admin) = config.admin_address() {
            handle.bootstrap_admin(admin).await?;
        }

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            head = storage.get_latest_block()?.number,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            task,
            storage,
            metrics,
            config,
        })
    }

    // Mutations

    /// Submit an arbitrary command on behalf of `caller`
    pub async fn execute(&self, caller: &Address, command: Command) -> Result<Receipt> {
        self.handle.execute(caller.clone(), command).await
    }

    /// Register a new lot; requires Producer
    pub async fn register_lot(
        &self,
        caller: &Address,
        product_name: impl Into<String>,
        origin: impl Into<String>,
        evidence_ref: EvidenceRef,
    ) -> Result<LotId> {
        let receipt = self
            .execute(
                caller,
                Command::RegisterLot {
                    product_name: product_name.into(),
                    origin: origin.into(),
                    evidence_ref,
                },
            )
            .await?;

        receipt
            .lot_id
            .ok_or_else(|| Error::Storage("registration allocated no lot id".to_string()))
    }

    /// Record a custody/status change; requires Producer, Distributor or Retailer
    pub async fn update_lot(
        &self,
        caller: &Address,
        lot_id: LotId,
        evidence_ref: EvidenceRef,
        new_status: LotStatus,
    ) -> Result<Receipt> {
        self.execute(
            caller,
            Command::UpdateLot {
                lot_id,
                evidence_ref,
                new_status,
            },
        )
        .await
    }

    /// Recall a lot; requires Regulator
    pub async fn trigger_recall(&self, caller: &Address, lot_id: LotId) -> Result<Receipt> {
        self.execute(caller, Command::TriggerRecall { lot_id }).await
    }

    /// Producer appoints a distributor
    pub async fn assign_distributor(&self, caller: &Address, account: &Address) -> Result<Receipt> {
        self.execute(
            caller,
            Command::AssignDistributor {
                account: account.clone(),
            },
        )
        .await
    }

    /// Distributor appoints a retailer
    pub async fn assign_retailer(&self, caller: &Address, account: &Address) -> Result<Receipt> {
        self.execute(
            caller,
            Command::AssignRetailer {
                account: account.clone(),
            },
        )
        .await
    }

    /// Admin grants any role
    pub async fn grant_role(&self, caller: &Address, role: Role, account: &Address) -> Result<Receipt> {
        self.execute(
            caller,
            Command::GrantRole {
                role,
                account: account.clone(),
            },
        )
        .await
    }

    /// Admin revokes a held role
    pub async fn revoke_role(&self, caller: &Address, role: Role, account: &Address) -> Result<Receipt> {
        self.execute(
            caller,
            Command::RevokeRole {
                role,
                account: account.clone(),
            },
        )
        .await
    }

    // Lot reads

    fn lot_record(&self, lot_id: LotId) -> Result<LotRecord> {
        self.storage
            .get_lot_record(lot_id)?
            .ok_or(Error::LotNotFound(lot_id))
    }

    /// Current lot state with full history
    pub fn get_lot(&self, lot_id: LotId) -> Result<Lot> {
        let record = self.lot_record(lot_id)?;
        let history = self.storage.get_history(lot_id, 0, record.history_len)?;
        Ok(Lot::from_record(record, history))
    }

    /// Full ordered history
    pub fn get_lot_history(&self, lot_id: LotId) -> Result<Vec<HistoryEntry>> {
        let record = self.lot_record(lot_id)?;
        self.storage.get_history(lot_id, 0, record.history_len)
    }

    /// One page of history; `limit` is clamped to `1..=history.max_page_size`
    pub fn get_lot_history_page(&self, lot_id: LotId, offset: u32, limit: u32) -> Result<HistoryPage> {
        let record = self.lot_record(lot_id)?;
        let total = record.history_len;
        let limit = limit.clamp(1, self.config.history.max_page_size);

        let entries = if offset >= total {
            Vec::new()
        } else {
            self.storage
                .get_history(lot_id, offset, limit.min(total - offset))?
        };

        let end = offset.saturating_add(entries.len() as u32);
        let next_offset = (end < total).then_some(end);

        Ok(HistoryPage {
            entries,
            total,
            next_offset,
        })
    }

    /// Number of lots ever registered
    pub fn lot_count(&self) -> Result<u64> {
        Ok(self.storage.next_lot_id()?.get() - 1)
    }

    // Role reads

    /// Roles held by an address
    pub fn roles_of(&self, address: &Address) -> Result<RoleSet> {
        self.storage.get_roles(address)
    }

    /// Whether an address holds a role
    pub fn has_role(&self, address: &Address, role: Role) -> Result<bool> {
        Ok(self.roles_of(address)?.contains(role))
    }

    // Log and block reads

    /// Highest sealed block number
    pub fn head_block(&self) -> Result<u64> {
        Ok(self.storage.get_latest_block()?.number)
    }

    /// Get block by number
    pub fn get_block(&self, number: u64) -> Result<BlockHeader> {
        self.storage.get_block(number)
    }

    /// Log entries of sealed blocks in `[from, min(to, head)]`
    pub fn fetch_logs(&self, from: u64, to: u64) -> Result<Vec<RawLogEntry>> {
        let to = to.min(self.head_block()?);
        self.storage.get_logs(from, to)
    }

    /// Seal the open block immediately
    pub async fn seal_block(&self) -> Result<Option<BlockHeader>> {
        self.handle.seal_block().await
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger, sealing the open block
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger actor panicked: {}", e)))
    }
}
