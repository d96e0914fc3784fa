use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Sync loop metrics, one registry per indexer
#[derive(Clone)]
pub struct IndexerMetrics {
    pub windows_applied: IntCounter,
    /// Labelled by error kind
    pub windows_failed: IntCounterVec,
    pub events_applied: IntCounter,
    pub duplicates_skipped: IntCounter,
    pub checkpoint: IntGauge,
    /// Blocks between the ledger head and the checkpoint
    pub lag: IntGauge,
    pub registry: Arc<Registry>,
}

impl IndexerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let windows_applied =
            IntCounter::new("indexer_windows_applied_total", "Windows committed to the projection")?;
        registry.register(Box::new(windows_applied.clone()))?;

        let windows_failed = IntCounterVec::new(
            Opts::new("indexer_windows_failed_total", "Abandoned windows by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(windows_failed.clone()))?;

        let events_applied =
            IntCounter::new("indexer_events_applied_total", "Events applied to the projection")?;
        registry.register(Box::new(events_applied.clone()))?;

        let duplicates_skipped = IntCounter::new(
            "indexer_duplicates_skipped_total",
            "Events skipped because their dedup key was already applied",
        )?;
        registry.register(Box::new(duplicates_skipped.clone()))?;

        let checkpoint = IntGauge::new("indexer_checkpoint_block", "Last fully applied block")?;
        registry.register(Box::new(checkpoint.clone()))?;

        let lag = IntGauge::new("indexer_lag_blocks", "Ledger head minus checkpoint")?;
        registry.register(Box::new(lag.clone()))?;

        Ok(Self {
            windows_applied,
            windows_failed,
            events_applied,
            duplicates_skipped,
            checkpoint,
            lag,
            registry,
        })
    }

    pub fn record_window(&self, applied: usize, duplicates: usize, checkpoint: u64) {
        self.windows_applied.inc();
        self.events_applied.inc_by(applied as u64);
        self.duplicates_skipped.inc_by(duplicates as u64);
        self.checkpoint.set(checkpoint as i64);
    }

    pub fn record_failure(&self, kind: &str) {
        self.windows_failed.with_label_values(&[kind]).inc();
    }

    pub fn record_lag(&self, head: u64, checkpoint: u64) {
        self.lag.set(head.saturating_sub(checkpoint) as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
