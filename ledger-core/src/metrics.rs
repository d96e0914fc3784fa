//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_accepted_total` - Accepted transactions by operation
//! - `ledger_transactions_rejected_total` - Rejected transactions by operation
//! - `ledger_lots_registered_total` - Lots registered
//! - `ledger_blocks_sealed_total` - Sealed blocks
//! - `ledger_head_block` - Highest sealed block
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Accepted transactions, labelled by operation
    pub transactions_accepted: IntCounterVec,

    /// Rejected transactions, labelled by operation
    pub transactions_rejected: IntCounterVec,

    /// Lots registered
    pub lots_registered: IntCounter,

    /// Blocks sealed
    pub blocks_sealed: IntCounter,

    /// Highest sealed block
    pub head_block: IntGauge,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_accepted = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_accepted_total",
                "Accepted transactions by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(transactions_accepted.clone()))?;

        let transactions_rejected = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_rejected_total",
                "Rejected transactions by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(transactions_rejected.clone()))?;

        let lots_registered =
            IntCounter::new("ledger_lots_registered_total", "Total number of lots registered")?;
        registry.register(Box::new(lots_registered.clone()))?;

        let blocks_sealed =
            IntCounter::new("ledger_blocks_sealed_total", "Total number of sealed blocks")?;
        registry.register(Box::new(blocks_sealed.clone()))?;

        let head_block = IntGauge::new("ledger_head_block", "Highest sealed block")?;
        registry.register(Box::new(head_block.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of transaction commit latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            transactions_accepted,
            transactions_rejected,
            lots_registered,
            blocks_sealed,
            head_block,
            commit_duration,
            registry,
        })
    }

    /// Record an accepted transaction
    pub fn record_accepted(&self, operation: &str) {
        self.transactions_accepted
            .with_label_values(&[operation])
            .inc();
    }

    /// Record a rejected transaction
    pub fn record_rejected(&self, operation: &str) {
        self.transactions_rejected
            .with_label_values(&[operation])
            .inc();
    }

    /// Record lot registration
    pub fn record_lot_registered(&self) {
        self.lots_registered.inc();
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a sealed block
    pub fn record_block_sealed(&self, number: u64) {
        self.blocks_sealed.inc();
        self.head_block.set(number as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
