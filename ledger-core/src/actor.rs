//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer orders every transition into a single log
//! - The writer owns the lot id counter and the transaction sequence
//! - Block production runs on the same task, so a block never seals half a
//!   transaction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Callers                            │
//! │      producers, distributors, regulators, admin       │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ plan() → Storage::commit() (one WriteBatch)     │  │
//! │  │ Open block: tx hashes + log count               │  │
//! │  │ Timer or max_transactions → seal_block()        │  │
//! │  └────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    crypto::{merkle_root, tx_hash},
    event::{LedgerEvent, RawLogEntry},
    metrics::Metrics,
    storage::{Storage, TxWrite},
    transition::{self, Command, Plan},
    types::{Address, BlockHeader, LogPosition, LotId, TxHash},
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Outcome of an accepted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Block the transaction's logs belong to
    pub block: u64,
    /// Lot allocated by a registration
    pub lot_id: Option<LotId>,
    /// Emitted events, in log order
    pub events: Vec<LedgerEvent>,
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Validate and apply a command
    Execute {
        caller: Address,
        command: Command,
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Grant Admin to the configured address if it lacks it
    BootstrapAdmin {
        admin: Address,
        response: oneshot::Sender<Result<Option<Receipt>>>,
    },

    /// Seal the open block now (returns `None` when it is empty)
    SealBlock {
        response: oneshot::Sender<Result<Option<BlockHeader>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Block currently collecting transactions
#[derive(Debug)]
struct OpenBlock {
    number: u64,
    tx_hashes: Vec<TxHash>,
    log_count: u32,
}

impl OpenBlock {
    fn new(number: u64) -> Self {
        Self {
            number,
            tx_hashes: Vec::new(),
            log_count: 0,
        }
    }
}

/// Block production settings
#[derive(Debug, Clone, Copy)]
pub struct BlockPolicy {
    /// Seal once the open block holds this many transactions
    pub max_transactions: usize,
    /// Seal a non-empty block on this interval
    pub interval: Duration,
    /// When false, seal after every transaction
    pub enabled: bool,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics
    metrics: Metrics,

    /// Last sealed block
    parent: BlockHeader,

    /// Block collecting transactions
    open: OpenBlock,

    /// Next lot id to allocate
    next_lot_id: LotId,

    /// Transactions accepted so far
    tx_sequence: u64,

    /// Block production settings
    policy: BlockPolicy,
}

impl LedgerActor {
    /// Create new actor, sealing any block left open by a previous process
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Metrics,
        policy: BlockPolicy,
    ) -> Result<Self> {
        let parent = storage.get_latest_block()?;
        let next_lot_id = storage.next_lot_id()?;
        let tx_sequence = storage.tx_sequence()?;
        metrics.head_block.set(parent.number as i64);

        let mut actor = Self {
            storage,
            mailbox,
            metrics,
            open: OpenBlock::new(parent.number + 1),
            parent,
            next_lot_id,
            tx_sequence,
            policy,
        };
        actor.recover_open_block()?;

        Ok(actor)
    }

    fn recover_open_block(&mut self) -> Result<()> {
        let pending = self.storage.get_logs(self.open.number, u64::MAX)?;
        if pending.is_empty() {
            return Ok(());
        }

        for entry in &pending {
            if entry.position.block != self.open.number {
                return Err(Error::Storage(format!(
                    "log entry {} lies beyond open block {}",
                    entry.position, self.open.number
                )));
            }
            if self.open.tx_hashes.last() != Some(&entry.tx_hash) {
                self.open.tx_hashes.push(entry.tx_hash);
            }
        }
        self.open.log_count = pending.len() as u32;

        tracing::warn!(
            block = self.open.number,
            tx_count = self.open.tx_hashes.len(),
            log_count = self.open.log_count,
            "Sealing block left open by previous run"
        );
        self.seal_block()?;

        Ok(())
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        // interval() panics on a zero period, which a disabled policy allows
        let mut block_timer = interval(self.policy.interval.max(Duration::from_millis(1)));
        block_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Process incoming messages
                Some(msg) = self.mailbox.recv() => {
                    match msg {
                        LedgerMessage::Shutdown => {
                            if let Err(e) = self.seal_block() {
                                tracing::error!(error = %e, "Error sealing block on shutdown");
                            }
                            break;
                        }
                        msg => self.handle_message(msg),
                    }
                }

                // Block interval expired
                _ = block_timer.tick(), if self.policy.enabled && !self.open.tx_hashes.is_empty() => {
                    if let Err(e) = self.seal_block() {
                        tracing::error!(error = %e, "Error sealing block on timer");
                    }
                }

                // Mailbox closed
                else => {
                    if let Err(e) = self.seal_block() {
                        tracing::error!(error = %e, "Error sealing block on close");
                    }
                    break;
                }
            }
        }

        tracing::info!(head = self.parent.number, "Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Execute {
                caller,
                command,
                response,
            } => {
                let result = self.execute(&caller, &command);
                if result.is_ok() {
                    self.seal_if_due();
                }
                let _ = response.send(result);
            }

            LedgerMessage::BootstrapAdmin { admin, response } => {
                let result = self.bootstrap_admin(&admin);
                if matches!(result, Ok(Some(_))) {
                    self.seal_if_due();
                }
                let _ = response.send(result);
            }

            LedgerMessage::SealBlock { response } => {
                let _ = response.send(self.seal_block());
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    /// Validate and commit one command
    fn execute(&mut self, caller: &Address, command: &Command) -> Result<Receipt> {
        let started = Instant::now();
        let operation = command.operation();

        let sequence = self.tx_sequence + 1;
        let payload = bincode::serialize(command)?;
        let tx_hash = tx_hash(caller, sequence, &payload);
        let now = Utc::now();

        let plan = match transition::plan(
            self.storage.as_ref(),
            caller,
            command,
            self.next_lot_id,
            tx_hash,
            now,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.record_rejected(operation.name());
                tracing::debug!(
                    operation = operation.name(),
                    caller = %caller,
                    error = %e,
                    "Transaction rejected"
                );
                return Err(e);
            }
        };

        let receipt = self.commit_plan(tx_hash, sequence, plan, now)?;

        self.metrics.record_accepted(operation.name());
        if receipt.lot_id.is_some() {
            self.metrics.record_lot_registered();
        }
        self.metrics
            .record_commit_duration(started.elapsed().as_secs_f64());

        tracing::debug!(
            operation = operation.name(),
            caller = %caller,
            tx_hash = %tx_hash,
            block = receipt.block,
            events = receipt.events.len(),
            "Transaction committed"
        );

        Ok(receipt)
    }

    fn bootstrap_admin(&mut self, admin: &Address) -> Result<Option<Receipt>> {
        let plan = match transition::plan_admin_bootstrap(self.storage.as_ref(), admin)? {
            Some(plan) => plan,
            None => return Ok(None),
        };

        let sequence = self.tx_sequence + 1;
        let tx_hash = tx_hash(admin, sequence, b"bootstrap-admin");
        let receipt = self.commit_plan(tx_hash, sequence, plan, Utc::now())?;

        tracing::info!(admin = %admin, "Granted Admin to bootstrap address");

        Ok(Some(receipt))
    }

    /// Write a plan and its log entries in one batch, then advance counters
    fn commit_plan(
        &mut self,
        tx_hash: TxHash,
        sequence: u64,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<Receipt> {
        let block = self.open.number;

        // Log entries carry the same clamped time as the history they describe
        let timestamp = plan
            .history
            .iter()
            .map(|h| h.entry.timestamp)
            .fold(now, |latest, t| latest.max(t));

        let mut logs = Vec::with_capacity(plan.events.len());
        for (offset, event) in plan.events.iter().enumerate() {
            let position = LogPosition::new(block, self.open.log_count + offset as u32);
            logs.push(RawLogEntry::encode(position, tx_hash, event, timestamp)?);
        }

        let next_lot_id = plan
            .allocated_lot
            .map(LotId::next)
            .unwrap_or(self.next_lot_id);

        let write = TxWrite {
            lots: plan.lots,
            history: plan.history,
            roles: plan.roles,
            logs,
            next_lot_id,
            tx_sequence: sequence,
        };
        self.storage.commit(&write)?;

        self.next_lot_id = next_lot_id;
        self.tx_sequence = sequence;
        self.open.tx_hashes.push(tx_hash);
        self.open.log_count += write.logs.len() as u32;

        Ok(Receipt {
            tx_hash,
            block,
            lot_id: plan.allocated_lot,
            events: plan.events,
        })
    }

    fn seal_if_due(&mut self) {
        let due = !self.policy.enabled || self.open.tx_hashes.len() >= self.policy.max_transactions;
        if due {
            if let Err(e) = self.seal_block() {
                tracing::error!(block = self.open.number, error = %e, "Error sealing block");
            }
        }
    }

    /// Seal the open block if it holds any transaction
    fn seal_block(&mut self) -> Result<Option<BlockHeader>> {
        if self.open.tx_hashes.is_empty() {
            return Ok(None);
        }

        let mut header = BlockHeader {
            number: self.open.number,
            parent_hash: self.parent.hash,
            tx_root: merkle_root(&self.open.tx_hashes),
            tx_count: self.open.tx_hashes.len() as u32,
            log_count: self.open.log_count,
            sealed_at: Utc::now().max(self.parent.sealed_at),
            hash: [0u8; 32],
        };
        header.hash = header.compute_hash();

        self.storage.put_block(&header)?;
        self.metrics.record_block_sealed(header.number);

        self.open = OpenBlock::new(header.number + 1);
        self.parent = header.clone();

        Ok(Some(header))
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Submit a command on behalf of `caller`
    pub async fn execute(&self, caller: Address, command: Command) -> Result<Receipt> {
        self.request(|response| LedgerMessage::Execute {
            caller,
            command,
            response,
        })
        .await
    }

    /// Grant Admin to `admin` unless it already holds it
    pub async fn bootstrap_admin(&self, admin: Address) -> Result<Option<Receipt>> {
        self.request(|response| LedgerMessage::BootstrapAdmin { admin, response })
            .await
    }

    /// Seal the open block immediately
    pub async fn seal_block(&self) -> Result<Option<BlockHeader>> {
        self.request(|response| LedgerMessage::SealBlock { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    metrics: Metrics,
    policy: BlockPolicy,
) -> Result<(LedgerHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, metrics, policy)?;

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    Ok((LedgerHandle::new(tx), task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvidenceRef, LotStatus, Role};
    use crate::Config;

    fn open_storage(dir: &tempfile::TempDir) -> Arc<Storage> {
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        Arc::new(Storage::open(&config).unwrap())
    }

    fn policy(max_transactions: usize, enabled: bool) -> BlockPolicy {
        BlockPolicy {
            max_transactions,
            interval: Duration::from_secs(3600),
            enabled,
        }
    }

    fn register() -> Command {
        Command::RegisterLot {
            product_name: "Kale".into(),
            origin: "Yuma".into(),
            evidence_ref: EvidenceRef::new("ev"),
        }
    }

    async fn with_producer(handle: &LedgerHandle) -> Address {
        let admin = Address::new("0xadmin");
        let producer = Address::new("0xproducer");
        handle.bootstrap_admin(admin.clone()).await.unwrap();
        handle
            .execute(
                admin,
                Command::GrantRole {
                    role: Role::Producer,
                    account: producer.clone(),
                },
            )
            .await
            .unwrap();
        producer
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, task) =
            spawn_ledger_actor(open_storage(&temp_dir), Metrics::new().unwrap(), policy(10, true))
                .unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_every_transaction_sealed_when_blocks_disabled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&temp_dir);
        let (handle, task) =
            spawn_ledger_actor(storage.clone(), Metrics::new().unwrap(), policy(10, false))
                .unwrap();

        let producer = with_producer(&handle).await;
        let receipt = handle.execute(producer, register()).await.unwrap();

        assert_eq!(receipt.lot_id, Some(LotId::new(1)));
        assert_eq!(receipt.block, 3);
        assert_eq!(storage.get_latest_block().unwrap().number, 3);
        assert_eq!(storage.get_logs(3, 3).unwrap().len(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_block_sealed_when_full_and_on_request() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&temp_dir);
        let (handle, task) =
            spawn_ledger_actor(storage.clone(), Metrics::new().unwrap(), policy(3, true)).unwrap();

        // bootstrap + grant + one registration fill block 1
        let producer = with_producer(&handle).await;
        handle.execute(producer.clone(), register()).await.unwrap();
        let head = storage.get_latest_block().unwrap();
        assert_eq!(head.number, 1);
        assert_eq!(head.tx_count, 3);
        assert_eq!(head.log_count, 4);

        let receipt = handle.execute(producer, register()).await.unwrap();
        assert_eq!(receipt.block, 2);
        assert_eq!(storage.get_latest_block().unwrap().number, 1);

        let sealed = handle.seal_block().await.unwrap().unwrap();
        assert_eq!(sealed.number, 2);
        assert_eq!(sealed.parent_hash, head.hash);
        assert!(handle.seal_block().await.unwrap().is_none());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_command_leaves_no_trace() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&temp_dir);
        let (handle, task) =
            spawn_ledger_actor(storage.clone(), Metrics::new().unwrap(), policy(10, false))
                .unwrap();

        let err = handle
            .execute(Address::new("0xnobody"), register())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
        assert_eq!(storage.tx_sequence().unwrap(), 0);
        assert_eq!(storage.next_lot_id().unwrap(), LotId::new(1));
        assert_eq!(storage.get_latest_block().unwrap().number, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_log_timestamp_matches_clamped_history() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&temp_dir);
        let (_tx, rx) = mpsc::channel(1);
        let mut actor =
            LedgerActor::new(storage.clone(), rx, Metrics::new().unwrap(), policy(10, true))
                .unwrap();

        let admin = Address::new("0xadmin");
        let producer = Address::new("0xproducer");
        actor.bootstrap_admin(&admin).unwrap();
        actor
            .execute(
                &admin,
                &Command::GrantRole {
                    role: Role::Producer,
                    account: producer.clone(),
                },
            )
            .unwrap();
        let lot_id = actor.execute(&producer, &register()).unwrap().lot_id.unwrap();

        // Last entry stamped ahead of the wall clock, as after a clock step back
        let ahead = Utc::now() + chrono::Duration::hours(1);
        let mut record = storage.get_lot_record(lot_id).unwrap().unwrap();
        record.updated_at = ahead;
        storage
            .commit(&TxWrite {
                lots: vec![record],
                history: vec![],
                roles: vec![],
                logs: vec![],
                next_lot_id: storage.next_lot_id().unwrap(),
                tx_sequence: storage.tx_sequence().unwrap(),
            })
            .unwrap();

        let receipt = actor
            .execute(
                &producer,
                &Command::UpdateLot {
                    lot_id,
                    evidence_ref: EvidenceRef::new("ship"),
                    new_status: LotStatus::InTransit,
                },
            )
            .unwrap();
        actor.seal_block().unwrap();

        let history = storage.get_history(lot_id, 0, 10).unwrap();
        assert_eq!(history[1].timestamp, ahead);

        let logs: Vec<_> = storage
            .get_logs(receipt.block, receipt.block)
            .unwrap()
            .into_iter()
            .filter(|entry| entry.tx_hash == receipt.tx_hash)
            .collect();
        assert_eq!(logs.len(), receipt.events.len());
        assert!(logs.iter().all(|entry| entry.timestamp == ahead));
    }

    #[tokio::test]
    async fn test_open_block_sealed_on_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&temp_dir);

        // Commit a transaction without sealing, as if the process died
        {
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            let mut actor =
                LedgerActor::new(storage.clone(), rx, Metrics::new().unwrap(), policy(10, true))
                    .unwrap();
            actor.bootstrap_admin(&Address::new("0xadmin")).unwrap();
            assert_eq!(storage.get_latest_block().unwrap().number, 0);
        }

        let (_tx, rx) = mpsc::channel(1);
        let actor =
            LedgerActor::new(storage.clone(), rx, Metrics::new().unwrap(), policy(10, true))
                .unwrap();
        let head = storage.get_latest_block().unwrap();
        assert_eq!(head.number, 1);
        assert_eq!(head.tx_count, 1);
        assert_eq!(head.log_count, 1);
        assert_eq!(actor.open.number, 2);
    }
}
