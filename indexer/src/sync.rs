//! Sync loop
//!
//! Drives the reader and the reconciler. Windows are processed strictly one
//! after another; a failed window is abandoned whole and retried after a
//! backoff delay. Cancellation is observed between windows and while
//! sleeping, never inside a commit.

use crate::{
    checkpoint::CheckpointManager,
    config::SyncConfig,
    error::Result,
    metrics::IndexerMetrics,
    projection::Projection,
    reader::EventReader,
    reconciler::Reconciler,
    retry::{Backoff, RetryConfig},
    source::LogSource,
};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub windows: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub checkpoint: u64,
}

/// Sync position relative to the ledger head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
    pub head_block: u64,
    pub checkpoint: u64,
    pub lag: u64,
}

pub struct Indexer<S> {
    reader: EventReader<S>,
    reconciler: Reconciler,
    checkpoints: CheckpointManager,
    projection: Projection,
    config: SyncConfig,
    metrics: IndexerMetrics,
    backoff: Backoff,
}

impl<S: LogSource> Indexer<S> {
    /// Build an indexer and load (or create) its checkpoint
    pub async fn new(source: S, projection: Projection, config: SyncConfig) -> Result<Self> {
        let pool = projection.pool().clone();
        let checkpoints = CheckpointManager::new(pool.clone());
        let checkpoint = checkpoints.load_or_init(config.start_block).await?;

        let metrics = IndexerMetrics::new()?;
        metrics.checkpoint.set(checkpoint as i64);

        Ok(Self {
            reader: EventReader::new(source, config.window_size, config.confirmations),
            reconciler: Reconciler::new(pool),
            checkpoints,
            projection,
            backoff: Backoff::new(RetryConfig::from(&config)),
            config,
            metrics,
        })
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn metrics(&self) -> &IndexerMetrics {
        &self.metrics
    }

    /// Consecutive failed cycles
    pub fn failures(&self) -> u32 {
        self.backoff.failures()
    }

    pub async fn status(&self) -> Result<IndexerStatus> {
        let head_block = self.reader.head().await?;
        let checkpoint = self.checkpoints.current().await?;
        Ok(IndexerStatus {
            head_block,
            checkpoint,
            lag: head_block.saturating_sub(checkpoint),
        })
    }

    /// Drop the projection and rewind to the configured start block
    ///
    /// The next cycle replays the ledger from `start_block`.
    pub async fn reset(&mut self) -> Result<u64> {
        self.checkpoints.reset().await?;
        let checkpoint = self.checkpoints.load_or_init(self.config.start_block).await?;

        self.metrics.checkpoint.set(checkpoint as i64);
        self.metrics.lag.set(0);
        self.backoff.reset();

        info!(checkpoint, "Resyncing from start block");
        Ok(checkpoint)
    }

    /// Apply windows until caught up with the confirmed head
    pub async fn sync_once(&mut self) -> Result<SyncReport> {
        self.drain(None).await
    }

    async fn drain(&mut self, shutdown: Option<&CancellationToken>) -> Result<SyncReport> {
        let head = self.reader.head().await?;
        let mut report = SyncReport {
            checkpoint: self.checkpoints.ensure(self.config.start_block).await?,
            ..SyncReport::default()
        };

        while let Some(window) = self.reader.plan(report.checkpoint, head) {
            if shutdown.map_or(false, |token| token.is_cancelled()) {
                debug!(window = %window, "Stop requested, leaving window for next start");
                break;
            }

            let events = self.reader.read(window).await?;
            let outcome = self.reconciler.apply_window(window, &events).await?;

            report.windows += 1;
            report.applied += outcome.applied;
            report.duplicates += outcome.duplicates;
            report.checkpoint = window.to;

            self.metrics
                .record_window(outcome.applied, outcome.duplicates, window.to);
        }

        self.metrics.record_lag(head, report.checkpoint);
        Ok(report)
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            window_size = self.config.window_size,
            confirmations = self.config.confirmations,
            poll_interval_ms = self.config.poll_interval_ms,
            "Indexer started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let delay = match self.drain(Some(&shutdown)).await {
                Ok(report) => {
                    if self.backoff.failures() > 0 {
                        info!(
                            failures = self.backoff.failures(),
                            "Indexer recovered"
                        );
                    }
                    self.backoff.reset();

                    if report.windows > 0 {
                        debug!(
                            windows = report.windows,
                            applied = report.applied,
                            duplicates = report.duplicates,
                            checkpoint = report.checkpoint,
                            "Sync cycle complete"
                        );
                    }
                    self.config.poll_interval()
                }
                Err(e) => {
                    self.metrics.record_failure(e.kind());
                    let delay = self.backoff.record_failure();

                    if e.is_consistency() {
                        error!(
                            error = %e,
                            failures = self.backoff.failures(),
                            "Projection disagrees with the ledger; reset required to recover"
                        );
                    } else {
                        warn!(
                            error = %e,
                            kind = e.kind(),
                            failures = self.backoff.failures(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Sync cycle failed, window abandoned"
                        );
                    }
                    delay
                }
            };

            if !sleep_or_cancel(delay, &shutdown).await {
                break;
            }
        }

        info!("Indexer stopped");
        Ok(())
    }
}

/// `false` when cancelled before the delay elapsed
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
