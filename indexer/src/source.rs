//! Access to the ledger's append-only event log

use crate::error::Result;
use async_trait::async_trait;
use foodsafe_ledger::{Ledger, RawLogEntry};
use std::sync::Arc;

/// Read endpoint over the ledger log
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Highest block whose entries may be fetched
    async fn head_block(&self) -> Result<u64>;

    /// Entries with `from <= block <= to`, ordered by position
    async fn fetch_logs(&self, from: u64, to: u64) -> Result<Vec<RawLogEntry>>;
}

#[async_trait]
impl LogSource for Ledger {
    async fn head_block(&self) -> Result<u64> {
        Ok(Ledger::head_block(self)?)
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> Result<Vec<RawLogEntry>> {
        Ok(Ledger::fetch_logs(self, from, to)?)
    }
}

#[async_trait]
impl<S: LogSource + ?Sized> LogSource for Arc<S> {
    async fn head_block(&self) -> Result<u64> {
        (**self).head_block().await
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> Result<Vec<RawLogEntry>> {
        (**self).fetch_logs(from, to).await
    }
}
