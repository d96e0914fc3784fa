//! Event Stream Reader
//!
//! Walks the ledger log in bounded windows of blocks, one window at a time.
//! A window ends `confirmations` blocks below the head. Raw entries are
//! decoded into typed events and checked for strict `(block, log_index)`
//! ordering before anything reaches the reconciler; a window that fails to
//! fetch or decode is dropped whole.

use crate::{
    error::{IndexerError, Result},
    source::LogSource,
};
use chrono::{DateTime, Utc};
use foodsafe_ledger::{LedgerEvent, LogPosition, RawLogEntry, TxHash};
use std::fmt;

/// Inclusive block range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: u64,
    pub to: u64,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Next window after `checkpoint`, or `None` when caught up
pub fn next_window(checkpoint: u64, head: u64, window_size: u64, confirmations: u64) -> Option<Window> {
    let from = checkpoint.checked_add(1)?;
    let safe_head = head.saturating_sub(confirmations);
    if from > safe_head {
        return None;
    }

    let to = from
        .saturating_add(window_size.max(1) - 1)
        .min(safe_head);
    Some(Window { from, to })
}

/// Identity of one event for idempotent application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

/// Log entry decoded into a projection-relevant event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub key: DedupKey,
    pub position: LogPosition,
    pub timestamp: DateTime<Utc>,
    pub event: LedgerEvent,
}

/// Decode a fetched window
///
/// Role events are dropped after decoding. Unknown topics and malformed
/// payloads fail the whole window.
pub fn decode_window(window: Window, entries: &[RawLogEntry]) -> Result<Vec<DecodedEvent>> {
    let mut decoded = Vec::with_capacity(entries.len());
    let mut previous: Option<LogPosition> = None;

    for entry in entries {
        let position = entry.position;
        if position.block < window.from || position.block > window.to {
            return Err(IndexerError::Consistency(format!(
                "log entry at {} outside window {}",
                position, window
            )));
        }
        if let Some(prev) = previous {
            if position <= prev {
                return Err(IndexerError::Consistency(format!(
                    "log entry at {} does not follow {}",
                    position, prev
                )));
            }
        }
        previous = Some(position);

        let event = entry
            .decode()
            .map_err(|e| IndexerError::Decode(format!("entry at {}: {}", position, e)))?;

        if matches!(event, LedgerEvent::RoleGranted(_) | LedgerEvent::RoleRevoked(_)) {
            tracing::trace!(position = %position, kind = event.kind().name(), "Skipping role event");
            continue;
        }

        decoded.push(DecodedEvent {
            key: DedupKey {
                tx_hash: entry.tx_hash,
                log_index: position.log_index,
            },
            position,
            timestamp: entry.timestamp,
            event,
        });
    }

    Ok(decoded)
}

/// Singleton consumer of the ledger log
pub struct EventReader<S> {
    source: S,
    window_size: u64,
    confirmations: u64,
}

impl<S: LogSource> EventReader<S> {
    pub fn new(source: S, window_size: u64, confirmations: u64) -> Self {
        Self {
            source,
            window_size,
            confirmations,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current head of the log
    pub async fn head(&self) -> Result<u64> {
        self.source.head_block().await
    }

    /// Window following `checkpoint` for the given head
    pub fn plan(&self, checkpoint: u64, head: u64) -> Option<Window> {
        next_window(checkpoint, head, self.window_size, self.confirmations)
    }

    /// Fetch and decode one window
    pub async fn read(&self, window: Window) -> Result<Vec<DecodedEvent>> {
        let entries = self.source.fetch_logs(window.from, window.to).await?;
        let events = decode_window(window, &entries)?;

        tracing::debug!(
            window = %window,
            entries = entries.len(),
            events = events.len(),
            "Window read"
        );

        Ok(events)
    }
}
