//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `lots` - Lot headers (key: lot_id)
//! - `history` - Append-only history entries (key: lot_id || seq)
//! - `logs` - Append-only event log (key: block || log_index)
//! - `blocks` - Sealed block headers (key: block number)
//! - `roles` - Capability sets (key: address)
//! - `meta` - Counters owned by the single writer
//!
//! All integer key components are big-endian so iteration order matches
//! numeric order.

use crate::{
    error::{Error, Result},
    event::RawLogEntry,
    transition::{HistoryAppend, StateView},
    types::{Address, BlockHeader, HistoryEntry, LotId, LotRecord, RoleSet},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_LOTS: &str = "lots";
const CF_HISTORY: &str = "history";
const CF_LOGS: &str = "logs";
const CF_BLOCKS: &str = "blocks";
const CF_ROLES: &str = "roles";
const CF_META: &str = "meta";

const META_NEXT_LOT_ID: &[u8] = b"next_lot_id";
const META_TX_SEQUENCE: &[u8] = b"tx_sequence";

/// Everything one accepted transaction writes
#[derive(Debug, Clone)]
pub struct TxWrite {
    pub lots: Vec<LotRecord>,
    pub history: Vec<HistoryAppend>,
    pub roles: Vec<(Address, RoleSet)>,
    pub logs: Vec<RawLogEntry>,
    pub next_lot_id: LotId,
    pub tx_sequence: u64,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Append-mostly workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOTS, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_LOGS, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_ROLES, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        let storage = Self { db: Arc::new(db) };
        storage.ensure_genesis()?;
        Ok(storage)
    }

    fn cf_options_zstd() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_lz4() -> Options {
        let mut opts = Options::default();
        // Frequently read, favour decompression speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn ensure_genesis(&self) -> Result<()> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        if self.db.get_cf(cf, 0u64.to_be_bytes())?.is_none() {
            self.put_block(&BlockHeader::genesis())?;
        }
        Ok(())
    }

    // Key helpers

    fn history_key(lot_id: LotId, seq: u32) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[..8].copy_from_slice(&lot_id.get().to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }

    fn log_key(block: u64, log_index: u32) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[..8].copy_from_slice(&block.to_be_bytes());
        key[8..].copy_from_slice(&log_index.to_be_bytes());
        key
    }

    fn read_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage(format!("corrupt meta value for {:?}", key)))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    // Counters

    /// Next lot id to allocate
    pub fn next_lot_id(&self) -> Result<LotId> {
        Ok(LotId::new(self.read_u64(META_NEXT_LOT_ID)?.unwrap_or(1)))
    }

    /// Number of transactions ever accepted
    pub fn tx_sequence(&self) -> Result<u64> {
        Ok(self.read_u64(META_TX_SEQUENCE)?.unwrap_or(0))
    }

    // Lot operations

    /// Get lot header
    pub fn get_lot_record(&self, lot_id: LotId) -> Result<Option<LotRecord>> {
        let cf = self.cf_handle(CF_LOTS)?;
        match self.db.get_cf(cf, lot_id.get().to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Read `limit` history entries starting at `offset`
    pub fn get_history(&self, lot_id: LotId, offset: u32, limit: u32) -> Result<Vec<HistoryEntry>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let start = Self::history_key(lot_id, offset);
        let prefix = lot_id.get().to_be_bytes();

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            if entries.len() as u32 >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    // Role operations

    /// Roles held by an address
    pub fn get_roles(&self, address: &Address) -> Result<RoleSet> {
        let cf = self.cf_handle(CF_ROLES)?;
        match self.db.get_cf(cf, address.as_str().as_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(RoleSet::empty()),
        }
    }

    // Log operations

    /// Log entries with `from <= block <= to`, in log order
    pub fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLogEntry>> {
        if from > to {
            return Ok(Vec::new());
        }

        let cf = self.cf_handle(CF_LOGS)?;
        let start = Self::log_key(from, 0);

        let mut logs = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            let block = u64::from_be_bytes(
                key[..8]
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt log key".to_string()))?,
            );
            if block > to {
                break;
            }
            logs.push(bincode::deserialize(&value)?);
        }

        Ok(logs)
    }

    // Block operations

    /// Put block header
    pub fn put_block(&self, header: &BlockHeader) -> Result<()> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let value = bincode::serialize(header)?;
        self.db.put_cf(cf, header.number.to_be_bytes(), &value)?;

        tracing::debug!(
            block = header.number,
            tx_count = header.tx_count,
            log_count = header.log_count,
            "Block sealed"
        );

        Ok(())
    }

    /// Get block by number
    pub fn get_block(&self, number: u64) -> Result<BlockHeader> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let value = self
            .db
            .get_cf(cf, number.to_be_bytes())?
            .ok_or(Error::BlockNotFound(number))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Highest sealed block
    pub fn get_latest_block(&self) -> Result<BlockHeader> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            }
            None => Err(Error::BlockNotFound(0)),
        }
    }

    // Batch operations (atomic)

    /// Commit one transaction's writes and counters atomically
    pub fn commit(&self, write: &TxWrite) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_lots = self.cf_handle(CF_LOTS)?;
        for record in &write.lots {
            batch.put_cf(cf_lots, record.id.get().to_be_bytes(), bincode::serialize(record)?);
        }

        let cf_history = self.cf_handle(CF_HISTORY)?;
        for append in &write.history {
            batch.put_cf(
                cf_history,
                Self::history_key(append.lot_id, append.seq),
                bincode::serialize(&append.entry)?,
            );
        }

        let cf_roles = self.cf_handle(CF_ROLES)?;
        for (address, roles) in &write.roles {
            batch.put_cf(cf_roles, address.as_str().as_bytes(), bincode::serialize(roles)?);
        }

        let cf_logs = self.cf_handle(CF_LOGS)?;
        for entry in &write.logs {
            batch.put_cf(
                cf_logs,
                Self::log_key(entry.position.block, entry.position.log_index),
                bincode::serialize(entry)?,
            );
        }

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_NEXT_LOT_ID, write.next_lot_id.get().to_be_bytes());
        batch.put_cf(cf_meta, META_TX_SEQUENCE, write.tx_sequence.to_be_bytes());

        self.db.write(batch)?;

        Ok(())
    }
}

impl StateView for Storage {
    fn lot_record(&self, lot_id: LotId) -> Result<Option<LotRecord>> {
        self.get_lot_record(lot_id)
    }

    fn roles_of(&self, address: &Address) -> Result<RoleSet> {
        self.get_roles(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LedgerEvent, LotRecalled};
    use crate::types::{EvidenceRef, LogPosition, LotStatus, Role, TxHash};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn record(id: u64, history_len: u32) -> LotRecord {
        LotRecord {
            id: LotId::new(id),
            product_name: "Lettuce".into(),
            origin: "Salinas".into(),
            producer: Address::new("0xp"),
            current_owner: Address::new("0xp"),
            status: LotStatus::Created,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            history_len,
        }
    }

    fn entry(evidence: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            evidence_ref: EvidenceRef::new(evidence),
            status: LotStatus::Created,
            actor: Address::new("0xp"),
            tx_hash: TxHash::from_bytes([0u8; 32]),
        }
    }

    fn log(block: u64, index: u32) -> RawLogEntry {
        RawLogEntry::encode(
            LogPosition::new(block, index),
            TxHash::from_bytes([block as u8; 32]),
            &LedgerEvent::LotRecalled(LotRecalled {
                lot_id: LotId::new(1),
                regulator: Address::new("0xr"),
            }),
            Utc::now(),
        )
        .unwrap()
    }

    fn empty_write(next_lot: u64, seq: u64) -> TxWrite {
        TxWrite {
            lots: vec![],
            history: vec![],
            roles: vec![],
            logs: vec![],
            next_lot_id: LotId::new(next_lot),
            tx_sequence: seq,
        }
    }

    #[test]
    fn test_storage_open_writes_genesis() {
        let (storage, _temp) = test_storage();
        assert_eq!(storage.get_latest_block().unwrap().number, 0);
        assert_eq!(storage.next_lot_id().unwrap(), LotId::new(1));
        assert_eq!(storage.tx_sequence().unwrap(), 0);
    }

    #[test]
    fn test_commit_is_visible_atomically() {
        let (storage, _temp) = test_storage();

        let mut roles = RoleSet::empty();
        roles.insert(Role::Producer);

        let mut write = empty_write(2, 1);
        write.lots.push(record(1, 1));
        write.history.push(HistoryAppend {
            lot_id: LotId::new(1),
            seq: 0,
            entry: entry("hashA"),
        });
        write.roles.push((Address::new("0xp"), roles));
        write.logs.push(log(1, 0));
        storage.commit(&write).unwrap();

        assert_eq!(storage.get_lot_record(LotId::new(1)).unwrap().unwrap().history_len, 1);
        assert_eq!(storage.get_history(LotId::new(1), 0, 10).unwrap().len(), 1);
        assert!(storage.get_roles(&Address::new("0xp")).unwrap().contains(Role::Producer));
        assert_eq!(storage.get_logs(1, 1).unwrap().len(), 1);
        assert_eq!(storage.next_lot_id().unwrap(), LotId::new(2));
        assert_eq!(storage.tx_sequence().unwrap(), 1);
    }

    #[test]
    fn test_history_pagination_stays_within_lot() {
        let (storage, _temp) = test_storage();

        let mut write = empty_write(3, 1);
        for seq in 0..5 {
            write.history.push(HistoryAppend {
                lot_id: LotId::new(1),
                seq,
                entry: entry(&format!("h{}", seq)),
            });
        }
        write.history.push(HistoryAppend {
            lot_id: LotId::new(2),
            seq: 0,
            entry: entry("other"),
        });
        storage.commit(&write).unwrap();

        let page = storage.get_history(LotId::new(1), 3, 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].evidence_ref.as_str(), "h3");
        assert_eq!(page[1].evidence_ref.as_str(), "h4");

        let first = storage.get_history(LotId::new(1), 0, 2).unwrap();
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_logs_range_is_ordered_and_bounded() {
        let (storage, _temp) = test_storage();

        let mut write = empty_write(1, 1);
        write.logs = vec![log(3, 1), log(1, 0), log(3, 0), log(2, 0), log(4, 0)];
        storage.commit(&write).unwrap();

        let positions: Vec<_> = storage
            .get_logs(2, 3)
            .unwrap()
            .iter()
            .map(|l| l.position)
            .collect();
        assert_eq!(
            positions,
            vec![
                LogPosition::new(2, 0),
                LogPosition::new(3, 0),
                LogPosition::new(3, 1)
            ]
        );
        assert!(storage.get_logs(5, 4).unwrap().is_empty());
    }

    #[test]
    fn test_blocks() {
        let (storage, _temp) = test_storage();
        let genesis = storage.get_block(0).unwrap();

        let mut header = BlockHeader {
            number: 1,
            parent_hash: genesis.hash,
            tx_root: [1u8; 32],
            tx_count: 1,
            log_count: 2,
            sealed_at: Utc::now(),
            hash: [0u8; 32],
        };
        header.hash = header.compute_hash();
        storage.put_block(&header).unwrap();

        assert_eq!(storage.get_latest_block().unwrap(), header);
        assert!(matches!(storage.get_block(9), Err(Error::BlockNotFound(9))));
    }
}
