//! Reconciliation Cycle Integration Tests
//!
//! End-to-end cycles against a scriptable broker and the in-memory store:
//! - Stuck local orders corrected from bulk broker snapshots
//! - Orders unknown to the broker marked failed, with the submission grace
//!   period honored
//! - Orphaned broker orders quarantined under the sentinel strategy
//! - Fills backfilled idempotently across repeated cycles
//! - Position snapshots corrected to broker state
//! - High-water mark advanced to cycle start, startup gate opened on success

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reconciliation_engine::broker::{BrokerError, BrokerPort, OrderQueryStatus};
use reconciliation_engine::models::{
    Activity, ActivityPage, BrokerOrder, BrokerPosition, OrderRecord, OrderSide, OrderStatus,
    SourcePriority, UNKNOWN_STRATEGY,
};
use reconciliation_engine::reconciliation::{
    CycleMode, CycleStatus, ReconciliationOrchestrator, StartupGate,
};
use reconciliation_engine::store::{InMemoryOrderStore, OrderStore};
use reconciliation_engine::ReconciliationConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Scriptable broker double.
#[derive(Default)]
struct FakeBroker {
    open_orders: Vec<BrokerOrder>,
    windowed_orders: Vec<BrokerOrder>,
    by_client_id: HashMap<String, BrokerOrder>,
    activities: Vec<Activity>,
    positions: Vec<BrokerPosition>,
    individual_lookups: Mutex<Vec<String>>,
    fail_bulk: bool,
}

#[async_trait]
impl BrokerPort for FakeBroker {
    async fn get_orders(
        &self,
        status: OrderQueryStatus,
        _limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        if self.fail_bulk {
            return Err(BrokerError::Network {
                message: "connection refused".to_string(),
            });
        }
        match (status, after) {
            (OrderQueryStatus::Open, _) => Ok(self.open_orders.clone()),
            (OrderQueryStatus::All, _) => Ok(self.windowed_orders.clone()),
        }
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        self.individual_lookups
            .lock()
            .unwrap()
            .push(client_order_id.to_string());
        Ok(self.by_client_id.get(client_order_id).cloned())
    }

    async fn get_account_activities(
        &self,
        _activity_type: &str,
        _after: DateTime<Utc>,
        _until: DateTime<Utc>,
        _page_size: usize,
        page_token: Option<String>,
    ) -> Result<ActivityPage, BrokerError> {
        if page_token.is_some() {
            return Ok(ActivityPage::default());
        }
        Ok(ActivityPage {
            activities: self.activities.clone(),
            next_page_token: None,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.clone())
    }
}

fn local_order(client_id: &str, status: OrderStatus) -> OrderRecord {
    OrderRecord {
        client_order_id: client_id.to_string(),
        broker_order_id: Some(format!("bkr-{client_id}")),
        symbol: "AAPL".to_string(),
        strategy_id: "momentum".to_string(),
        side: OrderSide::Buy,
        qty: dec!(100),
        status,
        status_rank: status.rank(),
        broker_updated_at: base_time(),
        source_priority: SourcePriority::Webhook,
        filled_qty: Decimal::ZERO,
        filled_avg_price: None,
        filled_at: None,
        created_at: base_time(),
    }
}

fn broker_snapshot(client_id: &str, status: &str, updated_at: DateTime<Utc>) -> BrokerOrder {
    BrokerOrder {
        broker_order_id: format!("bkr-{client_id}"),
        client_order_id: client_id.to_string(),
        symbol: "AAPL".to_string(),
        status: status.to_string(),
        filled_qty: Decimal::ZERO,
        filled_avg_price: None,
        updated_at: Some(updated_at),
        created_at: Some(base_time()),
        filled_at: None,
    }
}

fn filled_snapshot(client_id: &str, updated_at: DateTime<Utc>) -> BrokerOrder {
    BrokerOrder {
        filled_qty: dec!(100),
        filled_avg_price: Some(dec!(12.5)),
        filled_at: Some(updated_at),
        ..broker_snapshot(client_id, "filled", updated_at)
    }
}

fn orchestrator(
    store: Arc<InMemoryOrderStore>,
    broker: Arc<FakeBroker>,
    config: ReconciliationConfig,
) -> (
    ReconciliationOrchestrator<InMemoryOrderStore, FakeBroker>,
    Arc<StartupGate>,
) {
    let gate = Arc::new(StartupGate::new(config.dry_run));
    let orch = ReconciliationOrchestrator::new(config, store, broker, Arc::clone(&gate), None);
    (orch, gate)
}

#[tokio::test]
async fn test_startup_cycle_corrects_stuck_orders_and_opens_gate() {
    let store = Arc::new(InMemoryOrderStore::new());
    store
        .insert_order(local_order("ord-1", OrderStatus::Accepted))
        .await
        .unwrap();

    let broker = Arc::new(FakeBroker {
        open_orders: vec![broker_snapshot(
            "ord-1",
            "partially_filled",
            base_time() + Duration::minutes(5),
        )],
        ..FakeBroker::default()
    });

    let (orch, gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );
    assert!(!gate.is_open());

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.status, CycleStatus::Success);
    assert_eq!(report.mode, CycleMode::Startup);
    assert!(report.counts.orders_corrected >= 1);
    assert!(gate.is_open());

    let stored = store.get_order("ord-1").await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::PartiallyFilled);
}

#[tokio::test]
async fn test_startup_failure_keeps_gate_closed() {
    let store = Arc::new(InMemoryOrderStore::new());
    let broker = Arc::new(FakeBroker {
        fail_bulk: true,
        ..FakeBroker::default()
    });

    let (orch, gate) = orchestrator(store, broker, ReconciliationConfig::default());
    assert!(orch.run_startup().await.is_err());
    assert!(!gate.is_open());

    // A forced override with audit context unblocks order flow.
    gate.force_open("ops-oncall", "broker API outage, risk accepted")
        .unwrap();
    assert!(gate.is_open());
    let state = gate.state();
    assert!(state.override_active);
    assert_eq!(state.override_context.unwrap().operator, "ops-oncall");
}

#[tokio::test]
async fn test_order_unknown_to_broker_marked_failed() {
    let store = Arc::new(InMemoryOrderStore::new());
    let mut stale = local_order("ord-gone", OrderStatus::SubmittedUnconfirmed);
    // Created long ago, well past the grace period.
    stale.created_at = base_time() - Duration::hours(2);
    stale.broker_updated_at = base_time() - Duration::hours(2);
    store.insert_order(stale).await.unwrap();

    let broker = Arc::new(FakeBroker::default());
    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        Arc::clone(&broker),
        ReconciliationConfig::default(),
    );

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.counts.marked_failed, 1);
    assert_eq!(report.counts.individual_lookups, 1);
    assert_eq!(
        broker.individual_lookups.lock().unwrap().as_slice(),
        &["ord-gone".to_string()]
    );

    let stored = store.get_order("ord-gone").await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);
    // The failure marker is dated at the order's creation time so a later
    // genuine broker report would still dominate it.
    assert_eq!(stored.broker_updated_at, base_time() - Duration::hours(2));
}

#[tokio::test]
async fn test_fresh_submission_survives_cycle_within_grace() {
    let store = Arc::new(InMemoryOrderStore::new());
    let mut fresh = local_order("ord-fresh", OrderStatus::SubmittedUnconfirmed);
    fresh.created_at = Utc::now();
    fresh.broker_updated_at = fresh.created_at;
    store.insert_order(fresh).await.unwrap();

    let broker = Arc::new(FakeBroker::default());
    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.counts.marked_failed, 0);

    let stored = store.get_order("ord-fresh").await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::SubmittedUnconfirmed);
}

#[tokio::test]
async fn test_orphan_broker_order_quarantined() {
    let store = Arc::new(InMemoryOrderStore::new());
    let broker = Arc::new(FakeBroker {
        open_orders: vec![broker_snapshot("ghost-1", "accepted", base_time())],
        ..FakeBroker::default()
    });

    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.counts.orphans_detected, 1);

    let orphans = store.orphans();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].broker_order_id, "bkr-ghost-1");
    assert_eq!(orphans[0].strategy_id, UNKNOWN_STRATEGY);
    // The orphan never entered the order table.
    assert_eq!(store.order_count(), 0);
}

#[tokio::test]
async fn test_filled_order_backfills_fill_once_across_cycles() {
    let store = Arc::new(InMemoryOrderStore::new());
    store
        .insert_order(local_order("ord-1", OrderStatus::PartiallyFilled))
        .await
        .unwrap();

    let filled_at = base_time() + Duration::minutes(5);
    let broker = Arc::new(FakeBroker {
        open_orders: vec![filled_snapshot("ord-1", filled_at)],
        activities: vec![Activity {
            id: "act-1".to_string(),
            activity_type: "FILL".to_string(),
            broker_order_id: "bkr-ord-1".to_string(),
            symbol: "AAPL".to_string(),
            qty: dec!(100),
            price: dec!(12.5),
            transaction_time: filled_at,
        }],
        ..FakeBroker::default()
    });

    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    orch.run_startup().await.unwrap();
    orch.run_reconciliation_once(CycleMode::Periodic)
        .await
        .unwrap();

    // The CAS callback and the activity feed report the same economic fill;
    // the deterministic id collapses them, and the second cycle replays
    // without duplicating.
    let fills = store.get_fills_for_order("ord-1").await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].qty, dec!(100));

    // Realized P&L recomputed from the complete fill set: a lone buy leg.
    let pnl = store.realized_pnl("momentum", "AAPL").unwrap();
    assert_eq!(pnl, dec!(-1250));
}

#[tokio::test]
async fn test_closed_order_missing_fill_recovered_from_snapshot() {
    let store = Arc::new(InMemoryOrderStore::new());
    // Filled locally but the fill economics never landed: quantity known,
    // average price and fill rows missing.
    let mut closed = local_order("ord-1", OrderStatus::Filled);
    closed.filled_qty = dec!(100);
    closed.filled_avg_price = None;
    store.insert_order(closed).await.unwrap();
    // An earlier cycle already committed a mark, so this cycle runs the
    // incremental window query that surfaces the terminal snapshot.
    store
        .set_reconciliation_high_water_mark(base_time())
        .await
        .unwrap();

    let broker = Arc::new(FakeBroker {
        windowed_orders: vec![filled_snapshot("ord-1", base_time() + Duration::minutes(5))],
        ..FakeBroker::default()
    });

    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    let report = orch.run_startup().await.unwrap();
    assert!(report.counts.fills_backfilled >= 1);

    let fills = store.get_fills_for_order("ord-1").await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, dec!(12.5));
}

#[tokio::test]
async fn test_positions_corrected_to_broker_state() {
    let store = Arc::new(InMemoryOrderStore::new());
    let broker = Arc::new(FakeBroker {
        positions: vec![BrokerPosition {
            symbol: "MSFT".to_string(),
            qty: dec!(10),
            avg_entry_price: dec!(400),
        }],
        ..FakeBroker::default()
    });

    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.counts.positions_corrected, 1);

    let snapshots = store.get_position_snapshots().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].symbol, "MSFT");
    assert_eq!(snapshots[0].qty, dec!(10));
}

#[tokio::test]
async fn test_high_water_mark_set_to_cycle_start() {
    let store = Arc::new(InMemoryOrderStore::new());
    let broker = Arc::new(FakeBroker::default());

    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    assert!(store
        .get_reconciliation_high_water_mark()
        .await
        .unwrap()
        .is_none());

    let before = Utc::now();
    let report = orch.run_startup().await.unwrap();
    let after = Utc::now();

    let mark = store
        .get_reconciliation_high_water_mark()
        .await
        .unwrap()
        .unwrap();
    assert!(mark >= before && mark <= after);
    assert!(mark <= report.finished_at);
}

#[tokio::test]
async fn test_failed_cycle_leaves_high_water_mark_untouched() {
    let store = Arc::new(InMemoryOrderStore::new());
    store
        .set_reconciliation_high_water_mark(base_time())
        .await
        .unwrap();

    let broker = Arc::new(FakeBroker {
        fail_bulk: true,
        ..FakeBroker::default()
    });
    let (orch, _gate) = orchestrator(
        Arc::clone(&store),
        broker,
        ReconciliationConfig::default(),
    );

    assert!(orch.run_startup().await.is_err());
    let mark = store
        .get_reconciliation_high_water_mark()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mark, base_time());
}

#[tokio::test]
async fn test_dry_run_cycle_skips_and_opens_gate() {
    let store = Arc::new(InMemoryOrderStore::new());
    store
        .insert_order(local_order("ord-1", OrderStatus::Accepted))
        .await
        .unwrap();

    let broker = Arc::new(FakeBroker {
        open_orders: vec![broker_snapshot(
            "ord-1",
            "filled",
            base_time() + Duration::minutes(5),
        )],
        ..FakeBroker::default()
    });

    let config = ReconciliationConfig {
        dry_run: true,
        ..ReconciliationConfig::default()
    };
    let (orch, gate) = orchestrator(Arc::clone(&store), broker, config);
    assert!(gate.is_open());

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.status, CycleStatus::Skipped);

    // Nothing was written.
    let stored = store.get_order("ord-1").await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Accepted);
}

#[tokio::test]
async fn test_lookup_cap_carries_remainder_to_next_cycle() {
    let store = Arc::new(InMemoryOrderStore::new());
    for i in 0..5 {
        let mut o = local_order(&format!("ord-{i}"), OrderStatus::Accepted);
        o.created_at = base_time() - Duration::hours(1);
        o.broker_updated_at = o.created_at;
        store.insert_order(o).await.unwrap();
    }

    let broker = Arc::new(FakeBroker::default());
    let config = ReconciliationConfig {
        max_individual_lookups: 2,
        ..ReconciliationConfig::default()
    };
    let (orch, _gate) = orchestrator(Arc::clone(&store), Arc::clone(&broker), config);

    let report = orch.run_startup().await.unwrap();
    assert_eq!(report.counts.individual_lookups, 2);
    assert_eq!(report.counts.marked_failed, 2);

    // Next cycle picks up where the cap cut off.
    let report = orch
        .run_reconciliation_once(CycleMode::Periodic)
        .await
        .unwrap();
    assert_eq!(report.counts.individual_lookups, 2);
    assert_eq!(broker.individual_lookups.lock().unwrap().len(), 4);
}
