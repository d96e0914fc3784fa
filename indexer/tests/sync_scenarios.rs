//! Ledger to projection synchronization scenarios

use async_trait::async_trait;
use foodsafe_indexer::config::SyncConfig;
use foodsafe_indexer::reader::decode_window;
use foodsafe_indexer::{CheckpointManager, Indexer, IndexerError, Projection, Window};
use foodsafe_ledger::{Address, Config, EvidenceRef, Ledger, LotId, LotStatus, RawLogEntry, Role};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct World {
    ledger: Arc<Ledger>,
    projection: Projection,
    db_url: String,
    producer: Address,
    distributor: Address,
    regulator: Address,
    _dir: TempDir,
}

fn sync_config(window_size: u64, confirmations: u64) -> SyncConfig {
    SyncConfig {
        start_block: 1,
        window_size,
        confirmations,
        poll_interval_ms: 10,
        retry_initial_ms: 5,
        retry_max_ms: 20,
    }
}

async fn setup() -> World {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().join("ledger");
    config.admin = Some("0xadmin".to_string());
    config.block.enabled = false;

    let ledger = Ledger::open(config).await.unwrap();
    let admin = Address::new("0xadmin");
    let producer = Address::new("0xfarm");
    let distributor = Address::new("0xtrucks");
    let regulator = Address::new("0xfda");

    ledger.grant_role(&admin, Role::Producer, &producer).await.unwrap();
    ledger.grant_role(&admin, Role::Regulator, &regulator).await.unwrap();
    ledger.assign_distributor(&producer, &distributor).await.unwrap();

    let db_url = format!("sqlite://{}", dir.path().join("projection.db").display());
    let projection = Projection::connect(&db_url, 2).await.unwrap();

    World {
        ledger: Arc::new(ledger),
        projection,
        db_url,
        producer,
        distributor,
        regulator,
        _dir: dir,
    }
}

async fn register(world: &World, name: &str) -> LotId {
    world
        .ledger
        .register_lot(&world.producer, name, "Salinas Valley", EvidenceRef::new("hashA"))
        .await
        .unwrap()
}

/// Register, ship and recall one lot
async fn lifecycle(world: &World) -> LotId {
    let id = register(world, "Organic Lettuce").await;
    world
        .ledger
        .update_lot(&world.distributor, id, EvidenceRef::new("hashB"), LotStatus::InTransit)
        .await
        .unwrap();
    world
        .ledger
        .trigger_recall(&world.regulator, id)
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_lifecycle_is_projected() {
    let world = setup().await;
    let id = lifecycle(&world).await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(2, 0))
        .await
        .unwrap();
    let report = indexer.sync_once().await.unwrap();

    let head = world.ledger.head_block().unwrap();
    assert_eq!(report.checkpoint, head);
    assert!(report.windows > 1);
    // mint transfer, registration, custody transfer, status update, recall
    assert_eq!(report.applied, 5);
    assert_eq!(report.duplicates, 0);

    let lot = world.projection.lot(id.get()).await.unwrap().unwrap();
    assert_eq!(lot.product_name, "Organic Lettuce");
    assert_eq!(lot.origin, "Salinas Valley");
    assert_eq!(lot.producer, "0xfarm");
    assert_eq!(lot.current_owner, "0xtrucks");
    assert_eq!(lot.status, "Recalled");
    assert!(lot.is_recalled);

    let history = world.projection.history(id.get()).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|h| h.status.as_str()).collect();
    assert_eq!(statuses, vec!["Created", "InTransit", "Recalled"]);
    assert_eq!(history[2].evidence_ref, "RECALLED");
    assert_eq!(history[2].actor, "0xfda");

    assert_eq!(world.projection.recalls_for_lot(id.get()).await.unwrap().len(), 1);
    assert_eq!(world.projection.transfers(id.get()).await.unwrap().len(), 2);
    assert_eq!(world.projection.indexed_event_count().await.unwrap(), 5);

    let status = indexer.status().await.unwrap();
    assert_eq!(status.lag, 0);
    assert_eq!(indexer.metrics().events_applied.get(), 5);
}

#[tokio::test]
async fn test_repeated_recall_projects_each_event() {
    let world = setup().await;
    let id = lifecycle(&world).await;
    world
        .ledger
        .trigger_recall(&world.regulator, id)
        .await
        .unwrap();

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();
    indexer.sync_once().await.unwrap();

    assert_eq!(world.projection.recalls_for_lot(id.get()).await.unwrap().len(), 2);
    assert_eq!(world.projection.history(id.get()).await.unwrap().len(), 4);

    let stats = world.projection.stats().await.unwrap();
    assert_eq!(stats.total_lots, 1);
    assert_eq!(stats.recalled_lots, 1);
}

#[tokio::test]
async fn test_caught_up_sync_does_nothing() {
    let world = setup().await;
    lifecycle(&world).await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();
    indexer.sync_once().await.unwrap();

    let again = indexer.sync_once().await.unwrap();
    assert_eq!(again.windows, 0);
    assert_eq!(again.applied, 0);
    assert_eq!(world.projection.indexed_event_count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_replayed_window_has_no_effect() {
    let world = setup().await;
    let id = lifecycle(&world).await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();
    indexer.sync_once().await.unwrap();

    let head = world.ledger.head_block().unwrap();
    let window = Window { from: 1, to: head };
    let entries = world.ledger.fetch_logs(1, head).unwrap();
    let events = decode_window(window, &entries).unwrap();

    let outcome = indexer.reconciler().apply_events(&events).await.unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.duplicates, 5);
    assert_eq!(world.projection.history(id.get()).await.unwrap().len(), 3);
    assert_eq!(world.projection.recalls_for_lot(id.get()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restart_after_partial_window() {
    let world = setup().await;
    for name in ["Apples", "Pears", "Plums"] {
        register(&world, name).await;
    }

    let head = world.ledger.head_block().unwrap();
    let entries = world.ledger.fetch_logs(1, head).unwrap();
    let events = decode_window(Window { from: 1, to: head }, &entries).unwrap();
    assert_eq!(events.len(), 6);

    {
        // Crash after writing some events but before the checkpoint moved
        let indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
            .await
            .unwrap();
        indexer.reconciler().apply_events(&events[..3]).await.unwrap();
        assert_eq!(indexer.checkpoints().current().await.unwrap(), 0);
    }
    world.projection.close().await;

    let projection = Projection::connect(&world.db_url, 2).await.unwrap();
    let mut indexer = Indexer::new(world.ledger.clone(), projection.clone(), sync_config(100, 0))
        .await
        .unwrap();
    let report = indexer.sync_once().await.unwrap();

    assert_eq!(report.duplicates, 3);
    assert_eq!(report.applied, 3);
    assert_eq!(report.checkpoint, head);
    assert_eq!(projection.indexed_event_count().await.unwrap(), 6);
    for id in 1..=3 {
        assert_eq!(projection.history(id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_confirmations_hold_back_frontier() {
    let world = setup().await;
    let first = register(&world, "Apples").await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 2))
        .await
        .unwrap();
    let report = indexer.sync_once().await.unwrap();
    let head = world.ledger.head_block().unwrap();
    assert_eq!(report.checkpoint, head - 2);
    assert!(world.projection.lot(first.get()).await.unwrap().is_none());
    assert_eq!(indexer.status().await.unwrap().lag, 2);

    register(&world, "Pears").await;
    register(&world, "Plums").await;
    indexer.sync_once().await.unwrap();

    assert!(world.projection.lot(first.get()).await.unwrap().is_some());
    assert!(world.projection.lot(2).await.unwrap().is_none());
}

fn history_key(rows: &[foodsafe_indexer::projection::HistoryRow]) -> Vec<(String, i64, String)> {
    rows.iter()
        .map(|r| (r.tx_hash.clone(), r.log_index, r.status.clone()))
        .collect()
}

#[tokio::test]
async fn test_reset_then_resync_rebuilds_projection() {
    let world = setup().await;
    let id = lifecycle(&world).await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(3, 0))
        .await
        .unwrap();
    indexer.sync_once().await.unwrap();
    let before = world.projection.history(id.get()).await.unwrap();

    assert_eq!(indexer.reset().await.unwrap(), 0);
    assert_eq!(indexer.metrics().checkpoint.get(), 0);
    assert!(world.projection.lot(id.get()).await.unwrap().is_none());
    assert_eq!(world.projection.indexed_event_count().await.unwrap(), 0);

    // Same indexer keeps running after the reset
    let report = indexer.sync_once().await.unwrap();
    assert_eq!(report.applied, 5);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.checkpoint, world.ledger.head_block().unwrap());

    let after = world.projection.history(id.get()).await.unwrap();
    assert_eq!(history_key(&before), history_key(&after));
}

#[tokio::test]
async fn test_sync_recovers_from_reset_behind_its_back() {
    let world = setup().await;
    let id = lifecycle(&world).await;

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(3, 0))
        .await
        .unwrap();
    indexer.sync_once().await.unwrap();
    let before = world.projection.history(id.get()).await.unwrap();

    // Operator reset through the checkpoint table only
    CheckpointManager::new(world.projection.pool().clone())
        .reset()
        .await
        .unwrap();

    let report = indexer.sync_once().await.unwrap();
    assert_eq!(report.applied, 5);
    assert_eq!(history_key(&before), history_key(&world.projection.history(id.get()).await.unwrap()));
}

#[tokio::test]
async fn test_tampered_projection_is_consistency_error() {
    let world = setup().await;
    lifecycle(&world).await;

    // Dedup record for the first lot event, with a payload the ledger never emitted
    let head = world.ledger.head_block().unwrap();
    let entries = world.ledger.fetch_logs(1, head).unwrap();
    let events = decode_window(Window { from: 1, to: head }, &entries).unwrap();
    let first = &events[0];
    sqlx::query(
        "INSERT INTO indexed_events (tx_hash, log_index, block_number, event_type, payload, indexed_at)
         VALUES (?, ?, ?, 'OwnershipTransferred', '{}', '2024-01-01T00:00:00Z')",
    )
    .bind(first.key.tx_hash.to_hex())
    .bind(first.key.log_index as i64)
    .bind(first.position.block as i64)
    .execute(world.projection.pool())
    .await
    .unwrap();

    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();
    let err = indexer.sync_once().await.unwrap_err();
    assert!(err.is_consistency());
    assert_eq!(indexer.checkpoints().current().await.unwrap(), 0);
    assert!(world.projection.lot(1).await.unwrap().is_none());
}

/// Fails the first `remaining` fetches with a storage error
struct FlakySource {
    inner: Arc<Ledger>,
    remaining: AtomicU32,
}

#[async_trait]
impl foodsafe_indexer::LogSource for FlakySource {
    async fn head_block(&self) -> foodsafe_indexer::Result<u64> {
        self.inner.head_block().map_err(IndexerError::from)
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> foodsafe_indexer::Result<Vec<RawLogEntry>> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(foodsafe_ledger::Error::Storage("connection reset".into()).into());
        }
        self.inner.fetch_logs(from, to).map_err(IndexerError::from)
    }
}

#[tokio::test]
async fn test_run_retries_transient_failures() {
    let world = setup().await;
    let id = register(&world, "Apples").await;

    let source = FlakySource {
        inner: world.ledger.clone(),
        remaining: AtomicU32::new(3),
    };
    let mut indexer = Indexer::new(source, world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move {
        indexer.run(token).await.unwrap();
        indexer
    });

    let mut projected = false;
    for _ in 0..200 {
        if world.projection.lot(id.get()).await.unwrap().is_some() {
            projected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    let indexer = task.await.unwrap();

    assert!(projected);
    assert_eq!(
        indexer.metrics().windows_failed.with_label_values(&["ledger"]).get(),
        3
    );
    assert_eq!(indexer.failures(), 0);
    assert_eq!(world.projection.history(id.get()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_stops_when_cancelled() {
    let world = setup().await;
    let mut indexer = Indexer::new(world.ledger.clone(), world.projection.clone(), sync_config(100, 0))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), indexer.run(shutdown))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(indexer.checkpoints().current().await.unwrap(), 0);
}
