//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Total ordering of log positions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier, normalized to lowercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self(addr.as_ref().trim().to_ascii_lowercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty addresses are never valid callers or grantees
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequential lot identifier, the first lot is 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LotId(u64);

impl LotId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Id allocated after this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lot status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LotStatus {
    /// Initial state after registration
    Created = 0,
    /// Moving between stakeholders
    InTransit = 1,
    /// Available at a retailer
    OnShelf = 2,
    /// Withdrawn by a regulator
    Recalled = 3,
}

impl LotStatus {
    /// Stable name used in the projection
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Created => "Created",
            LotStatus::InTransit => "InTransit",
            LotStatus::OnShelf => "OnShelf",
            LotStatus::Recalled => "Recalled",
        }
    }

    /// Parse from the stable name
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(LotStatus::Created),
            "InTransit" => Some(LotStatus::InTransit),
            "OnShelf" => Some(LotStatus::OnShelf),
            "Recalled" => Some(LotStatus::Recalled),
            _ => None,
        }
    }

    /// Statuses an update may set
    pub fn is_updatable_target(&self) -> bool {
        !matches!(self, LotStatus::Created)
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability tag held by an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    /// Grants any role
    Admin = 0,
    /// Registers lots, delegates distributors
    Producer = 1,
    /// Moves lots, delegates retailers
    Distributor = 2,
    /// Shelves lots
    Retailer = 3,
    /// Triggers recalls
    Regulator = 4,
}

impl Role {
    /// All roles, in tag order
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Producer,
        Role::Distributor,
        Role::Retailer,
        Role::Regulator,
    ];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Producer => "Producer",
            Role::Distributor => "Distributor",
            Role::Retailer => "Retailer",
            Role::Regulator => "Regulator",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Set of roles held by one address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet(u8);

impl RoleSet {
    /// Empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether `role` is held
    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    /// Whether any of `roles` is held
    pub fn contains_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.contains(*r))
    }

    /// Add a role, returns false if it was already held
    pub fn insert(&mut self, role: Role) -> bool {
        let had = self.contains(role);
        self.0 |= role.bit();
        !had
    }

    /// Remove a role, returns false if it was not held
    pub fn remove(&mut self, role: Role) -> bool {
        let had = self.contains(role);
        self.0 &= !role.bit();
        had
    }

    /// No roles held
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Held roles in tag order
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

/// Opaque content-addressed pointer to off-chain evidence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    /// Marker stored on recall history entries
    pub const RECALL_SENTINEL: &'static str = "RECALLED";

    /// Wrap a reference; the ledger never interprets it
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The recall sentinel
    pub fn recall() -> Self {
        Self(Self::RECALL_SENTINEL.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash (SHA-256)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Create from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse the `0x`-prefixed form produced by [`TxHash::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.to_hex())
    }
}

/// Position of one entry in the event log
///
/// Ordered by block first, then by index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Block number
    pub block: u64,
    /// Index of the entry within its block
    pub log_index: u32,
}

impl LogPosition {
    /// Create new position
    pub const fn new(block: u64, log_index: u32) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// One immutable entry of a lot's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Non-decreasing within a lot
    pub timestamp: DateTime<Utc>,
    /// Evidence supplied with the transition
    pub evidence_ref: EvidenceRef,
    /// Lot status right after this entry
    pub status: LotStatus,
    /// Address that caused the entry
    pub actor: Address,
    /// Transaction that appended the entry
    pub tx_hash: TxHash,
}

/// Stored lot header; history entries live under their own keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRecord {
    /// Lot id
    pub id: LotId,
    /// Product name
    pub product_name: String,
    /// Origin
    pub origin: String,
    /// Producer that registered the lot
    pub producer: Address,
    /// Current owner
    pub current_owner: Address,
    /// Current status
    pub status: LotStatus,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Time of the latest history entry
    pub updated_at: DateTime<Utc>,
    /// Number of history entries
    pub history_len: u32,
}

/// Full lot view returned by reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Lot id
    pub id: LotId,
    /// Product name
    pub product_name: String,
    /// Origin
    pub origin: String,
    /// Producer that registered the lot
    pub producer: Address,
    /// Current owner
    pub current_owner: Address,
    /// Current status
    pub status: LotStatus,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Time of the latest history entry
    pub updated_at: DateTime<Utc>,
    /// Ordered history
    pub history: Vec<HistoryEntry>,
}

impl Lot {
    /// Assemble a view from its header and history
    pub fn from_record(record: LotRecord, history: Vec<HistoryEntry>) -> Self {
        Self {
            id: record.id,
            product_name: record.product_name,
            origin: record.origin,
            producer: record.producer,
            current_owner: record.current_owner,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            history,
        }
    }

    /// Whether a regulator recalled this lot
    pub fn is_recalled(&self) -> bool {
        self.status == LotStatus::Recalled
    }
}

/// One page of a lot's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Entries in this page
    pub entries: Vec<HistoryEntry>,
    /// Total entries in the lot's history
    pub total: u32,
    /// Offset of the next page, if any
    pub next_offset: Option<u32>,
}

/// Sealed block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (sequential, genesis is 0)
    pub number: u64,
    /// Hash of the previous block
    pub parent_hash: [u8; 32],
    /// Merkle root of transaction hashes in this block
    pub tx_root: [u8; 32],
    /// Number of transactions
    pub tx_count: u32,
    /// Number of log entries
    pub log_count: u32,
    /// Seal time
    pub sealed_at: DateTime<Utc>,
    /// Hash of this header's contents
    pub hash: [u8; 32],
}

impl BlockHeader {
    /// Empty genesis block
    pub fn genesis() -> Self {
        let mut header = Self {
            number: 0,
            parent_hash: [0u8; 32],
            tx_root: [0u8; 32],
            tx_count: 0,
            log_count: 0,
            sealed_at: DateTime::<Utc>::default(),
            hash: [0u8; 32],
        };
        header.hash = header.compute_hash();
        header
    }

    /// Compute block hash
    pub fn compute_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.tx_root);
        hasher.update(self.tx_count.to_be_bytes());
        hasher.update(self.log_count.to_be_bytes());
        hasher.update(self.sealed_at.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());

        hasher.finalize().into()
    }
}
