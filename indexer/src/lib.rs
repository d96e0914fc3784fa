//! FoodSafe Projection Indexer
//!
//! Mirrors the ledger's event log into a SQLite projection with
//! exactly-once effect. One indexer per projection database.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod projection;
pub mod reader;
pub mod reconciler;
pub mod retry;
pub mod source;
pub mod sync;

pub use checkpoint::CheckpointManager;
pub use config::IndexerConfig;
pub use error::{IndexerError, Result};
pub use projection::Projection;
pub use reader::{DecodedEvent, DedupKey, EventReader, Window};
pub use reconciler::{ApplyOutcome, Reconciler};
pub use source::LogSource;
pub use sync::{Indexer, IndexerStatus, SyncReport};
