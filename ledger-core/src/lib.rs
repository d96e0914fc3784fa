//! FoodSafe Ledger Core
//!
//! Append-only, role-gated ledger tracking food lots through a supply chain.
//!
//! # Architecture
//!
//! - **State Machine**: Every mutation is planned against current state,
//!   then committed as one atomic batch
//! - **Single Writer**: One actor task orders all transitions and owns the
//!   lot id counter
//! - **Event Log**: Accepted transitions emit typed events, grouped into
//!   sealed blocks with a Merkle root over their transactions
//! - **Capabilities**: Explicit address → role set mapping, checked per
//!   operation
//!
//! # Invariants
//!
//! - Lot ids are gapless and strictly increasing from 1
//! - History is append-only; entries are never mutated or removed
//! - A rejected operation leaves no trace in state or in the log
//! - Logs are exposed only for sealed blocks, in (block, log_index) order

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod actor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod ledger;
pub mod metrics;
pub mod roles;
pub mod storage;
pub mod transition;
pub mod types;

// Re-exports
pub use actor::Receipt;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventKind, LedgerEvent, RawLogEntry};
pub use ledger::Ledger;
pub use storage::Storage;
pub use transition::Command;
pub use types::{
    Address, BlockHeader, EvidenceRef, HistoryEntry, HistoryPage, LogPosition, Lot, LotId,
    LotStatus, Role, RoleSet, TxHash,
};
