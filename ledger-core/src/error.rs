//! Error types for the ledger

use crate::types::{Address, LotId, Role};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller lacks the capability the operation requires
    #[error("Unauthorized: {caller} lacks required role(s) {required}")]
    Unauthorized {
        /// Address that attempted the operation
        caller: Address,
        /// Human readable list of acceptable roles
        required: String,
    },

    /// Referenced lot does not exist
    #[error("Lot not found: {0}")]
    LotNotFound(LotId),

    /// Malformed input (empty required field, disallowed status, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Raw log entry could not be decoded into a domain event
    #[error("Decode error: {0}")]
    Decode(String),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unauthorized(caller: &Address, required: &[Role]) -> Self {
        let required = required
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join("|");
        Error::Unauthorized {
            caller: caller.clone(),
            required,
        }
    }

    /// Infrastructure failures that may succeed when retried.
    ///
    /// Authorization, lookup and validation rejections are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::Concurrency(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
