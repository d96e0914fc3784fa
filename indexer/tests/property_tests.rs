//! Property-based tests for exactly-once projection
//!
//! - Any prefix of a window may already be applied when the indexer
//!   restarts; the final projection is the same as a clean sync
//! - Window size does not change the result

use foodsafe_indexer::config::SyncConfig;
use foodsafe_indexer::reader::decode_window;
use foodsafe_indexer::{Indexer, Projection, Window};
use foodsafe_ledger::{Address, Config, EvidenceRef, Ledger, LotId, LotStatus, Role};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Step {
    Register,
    Ship(u64),
    Recall(u64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Register),
        2 => (1u64..6).prop_map(Step::Ship),
        1 => (1u64..6).prop_map(Step::Recall),
    ]
}

fn sync_config(window_size: u64) -> SyncConfig {
    SyncConfig {
        start_block: 1,
        window_size,
        confirmations: 0,
        poll_interval_ms: 10,
        retry_initial_ms: 5,
        retry_max_ms: 20,
    }
}

async fn build_ledger(steps: &[Step]) -> (Arc<Ledger>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().join("ledger");
    config.admin = Some("0xadmin".to_string());
    config.block.max_transactions = 2;
    config.block.interval_ms = 3_600_000;

    let ledger = Ledger::open(config).await.unwrap();
    let admin = Address::new("0xadmin");
    let producer = Address::new("0xfarm");
    let distributor = Address::new("0xtrucks");
    let regulator = Address::new("0xfda");
    ledger.grant_role(&admin, Role::Producer, &producer).await.unwrap();
    ledger.grant_role(&admin, Role::Regulator, &regulator).await.unwrap();
    ledger.assign_distributor(&producer, &distributor).await.unwrap();

    for step in steps {
        // Steps on lots that do not exist yet are rejected and leave no trace
        let _ = match step {
            Step::Register => ledger
                .register_lot(&producer, "Lot", "Farm", EvidenceRef::new("ev"))
                .await
                .map(|_| ()),
            Step::Ship(id) => ledger
                .update_lot(&distributor, LotId::new(*id), EvidenceRef::new("ship"), LotStatus::InTransit)
                .await
                .map(|_| ()),
            Step::Recall(id) => ledger
                .trigger_recall(&regulator, LotId::new(*id))
                .await
                .map(|_| ()),
        };
    }
    ledger.seal_block().await.unwrap();

    (Arc::new(ledger), dir)
}

/// Ordered dump of everything the projection holds
async fn snapshot(projection: &Projection) -> Vec<String> {
    let mut rows = Vec::new();
    for lot in projection.lots(0, 1000).await.unwrap() {
        rows.push(format!(
            "lot {} {} {} {}",
            lot.lot_id, lot.current_owner, lot.status, lot.is_recalled
        ));
        for h in projection.history(lot.lot_id as u64).await.unwrap() {
            rows.push(format!("  {} {} {} {}", h.tx_hash, h.log_index, h.status, h.evidence_ref));
        }
    }
    rows.push(format!("recalls {}", projection.recalls(0, 1000).await.unwrap().len()));
    rows.push(format!("events {}", projection.indexed_event_count().await.unwrap()));
    rows
}

async fn projection_at(dir: &TempDir, name: &str) -> Projection {
    let url = format!("sqlite://{}", dir.path().join(name).display());
    Projection::connect(&url, 2).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: a partially applied prefix plus a full sync equals a clean sync
    #[test]
    fn prop_partial_apply_then_sync_is_exactly_once(
        steps in prop::collection::vec(step_strategy(), 1..12),
        cut in 0usize..40,
        window_size in 1u64..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, dir) = build_ledger(&steps).await;

            let clean = projection_at(&dir, "clean.db").await;
            let mut indexer = Indexer::new(ledger.clone(), clean.clone(), sync_config(100))
                .await
                .unwrap();
            indexer.sync_once().await.unwrap();
            let expected = snapshot(&clean).await;

            let head = ledger.head_block().unwrap();
            let entries = ledger.fetch_logs(1, head).unwrap();
            let events = decode_window(Window { from: 1, to: head }, &entries).unwrap();
            let cut = cut.min(events.len());

            let crashed = projection_at(&dir, "crashed.db").await;
            let mut indexer = Indexer::new(ledger.clone(), crashed.clone(), sync_config(window_size))
                .await
                .unwrap();
            indexer.reconciler().apply_events(&events[..cut]).await.unwrap();
            let report = indexer.sync_once().await.unwrap();

            prop_assert_eq!(report.duplicates, cut);
            prop_assert_eq!(report.applied + report.duplicates, events.len());
            prop_assert_eq!(report.checkpoint, head);
            prop_assert_eq!(snapshot(&crashed).await, expected);
            Ok(())
        })?;
    }
}
