//! In-memory order store.
//!
//! Enforces the same CAS semantics as the SQL-backed store and backs the
//! test suite and the shadow-mode harness.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{OrderStore, PnlRecalcCounts, StoreError, evaluate_cas};
use crate::models::{
    CasUpdate, Fill, OrderRecord, OrderSide, OrphanRecord, PositionSnapshot,
};

/// In-memory implementation of [`OrderStore`].
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, OrderRecord>>,
    fills: RwLock<HashMap<String, Vec<Fill>>>,
    positions: RwLock<HashMap<String, PositionSnapshot>>,
    orphans: RwLock<HashMap<String, OrphanRecord>>,
    orphan_statuses: RwLock<HashMap<String, String>>,
    realized_pnl: RwLock<HashMap<(String, String), Decimal>>,
    high_water_mark: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryOrderStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders held.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.read().map(|o| o.len()).unwrap_or(0)
    }

    /// All recorded orphans (for alerting read paths and tests).
    #[must_use]
    pub fn orphans(&self) -> Vec<OrphanRecord> {
        self.orphans
            .read()
            .map(|o| o.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Bookkeeping status for a recorded orphan.
    #[must_use]
    pub fn orphan_status(&self, broker_order_id: &str) -> Option<String> {
        self.orphan_statuses
            .read()
            .ok()
            .and_then(|s| s.get(broker_order_id).cloned())
    }

    /// Realized P&L last computed for a strategy/symbol pair.
    #[must_use]
    pub fn realized_pnl(&self, strategy_id: &str, symbol: &str) -> Option<Decimal> {
        self.realized_pnl
            .read()
            .ok()
            .and_then(|p| p.get(&(strategy_id.to_string(), symbol.to_string())).copied())
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Unavailable {
            message: "store lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(|_| Self::lock_poisoned())?;
        if orders.contains_key(&order.client_order_id) {
            return Err(StoreError::Constraint {
                message: format!("duplicate client_order_id {}", order.client_order_id),
            });
        }
        orders.insert(order.client_order_id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, client_order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        Ok(orders.get(client_order_id).cloned())
    }

    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        Ok(orders
            .values()
            .find(|o| o.broker_order_id.as_deref() == Some(broker_order_id))
            .cloned())
    }

    async fn update_order_status_cas(
        &self,
        update: CasUpdate,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let mut orders = self.orders.write().map_err(|_| Self::lock_poisoned())?;
        let Some(existing) = orders.get(&update.client_order_id) else {
            return Ok(None);
        };
        match evaluate_cas(existing, &update) {
            Some(updated) => {
                orders.insert(updated.client_order_id.clone(), updated.clone());
                Ok(Some(updated))
            }
            None => Ok(None),
        }
    }

    async fn get_non_terminal_orders(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        Ok(orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_order_ids_by_client_ids(
        &self,
        client_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        Ok(client_ids
            .iter()
            .filter(|id| orders.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn get_reconciliation_high_water_mark(
        &self,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mark = self.high_water_mark.read().map_err(|_| Self::lock_poisoned())?;
        Ok(*mark)
    }

    async fn set_reconciliation_high_water_mark(
        &self,
        mark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut stored = self.high_water_mark.write().map_err(|_| Self::lock_poisoned())?;
        *stored = Some(mark);
        Ok(())
    }

    async fn create_orphan_order(&self, orphan: OrphanRecord) -> Result<bool, StoreError> {
        let mut orphans = self.orphans.write().map_err(|_| Self::lock_poisoned())?;
        if orphans.contains_key(&orphan.broker_order_id) {
            return Ok(false);
        }
        orphans.insert(orphan.broker_order_id.clone(), orphan);
        Ok(true)
    }

    async fn update_orphan_order_status(
        &self,
        broker_order_id: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        let mut statuses = self
            .orphan_statuses
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        statuses.insert(broker_order_id.to_string(), status.to_string());
        Ok(())
    }

    async fn upsert_position_snapshot(
        &self,
        snapshot: PositionSnapshot,
    ) -> Result<(), StoreError> {
        let mut positions = self.positions.write().map_err(|_| Self::lock_poisoned())?;
        positions.insert(snapshot.symbol.clone(), snapshot);
        Ok(())
    }

    async fn get_position_snapshots(&self) -> Result<Vec<PositionSnapshot>, StoreError> {
        let positions = self.positions.read().map_err(|_| Self::lock_poisoned())?;
        Ok(positions.values().cloned().collect())
    }

    async fn append_fill_to_order_metadata(
        &self,
        client_order_id: &str,
        fill: Fill,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        let Some(order) = orders.get(client_order_id).cloned() else {
            return Err(StoreError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            });
        };
        drop(orders);

        let mut fills = self.fills.write().map_err(|_| Self::lock_poisoned())?;
        let order_fills = fills.entry(client_order_id.to_string()).or_default();
        if order_fills.iter().any(|f| f.fill_id == fill.fill_id) {
            // Duplicate application is a no-op.
            return Ok(None);
        }
        order_fills.push(fill);
        Ok(Some(order))
    }

    async fn get_fills_for_order(&self, client_order_id: &str) -> Result<Vec<Fill>, StoreError> {
        let fills = self.fills.read().map_err(|_| Self::lock_poisoned())?;
        Ok(fills.get(client_order_id).cloned().unwrap_or_default())
    }

    async fn get_terminal_orders_missing_fills(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        let fills = self.fills.read().map_err(|_| Self::lock_poisoned())?;
        Ok(orders
            .values()
            .filter(|o| {
                o.status.is_terminal()
                    && o.filled_qty > Decimal::ZERO
                    && fills.get(&o.client_order_id).is_none_or(Vec::is_empty)
            })
            .cloned()
            .collect())
    }

    async fn recalculate_trade_realized_pnl(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<PnlRecalcCounts, StoreError> {
        // Recomputed from the complete fill set every time, never
        // incrementally accumulated, so re-running backfill is safe.
        let orders = self.orders.read().map_err(|_| Self::lock_poisoned())?;
        let fills = self.fills.read().map_err(|_| Self::lock_poisoned())?;

        let mut counts = PnlRecalcCounts::default();
        let mut net_cash = Decimal::ZERO;
        for order in orders
            .values()
            .filter(|o| o.strategy_id == strategy_id && o.symbol == symbol)
        {
            counts.orders_scanned += 1;
            for fill in fills.get(&order.client_order_id).into_iter().flatten() {
                counts.fills_considered += 1;
                let notional = fill.qty * fill.price;
                match order.side {
                    OrderSide::Buy => net_cash -= notional,
                    OrderSide::Sell => net_cash += notional,
                }
            }
        }
        drop(orders);
        drop(fills);

        let mut pnl = self.realized_pnl.write().map_err(|_| Self::lock_poisoned())?;
        pnl.insert((strategy_id.to_string(), symbol.to_string()), net_cash);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{FillSource, OrderStatus, SourcePriority};
    use crate::store::test_fixtures::{base_time, order};

    fn filled_update(id: &str, at: DateTime<Utc>) -> CasUpdate {
        CasUpdate {
            client_order_id: id.to_string(),
            status: OrderStatus::Filled,
            broker_updated_at: at,
            status_rank: OrderStatus::Filled.rank(),
            source_priority: SourcePriority::Reconciliation,
            filled_qty: dec!(100),
            filled_avg_price: Some(dec!(10)),
            filled_at: Some(at),
            broker_order_id: Some(format!("bkr-{id}")),
        }
    }

    #[tokio::test]
    async fn test_cas_update_applies_then_conflicts() {
        let store = InMemoryOrderStore::new();
        store
            .insert_order(order("ord-1", OrderStatus::PartiallyFilled))
            .await
            .unwrap();

        let update = filled_update("ord-1", base_time() + Duration::minutes(5));
        let first = store.update_order_status_cas(update.clone()).await.unwrap();
        assert!(first.is_some());

        // Identical snapshot applied twice: second attempt is a conflict.
        let second = store.update_order_status_cas(update).await.unwrap();
        assert!(second.is_none());

        let stored = store.get_order("ord-1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.filled_qty, dec!(100));
    }

    #[tokio::test]
    async fn test_cas_unknown_order_is_noop() {
        let store = InMemoryOrderStore::new();
        let result = store
            .update_order_status_cas(filled_update("missing", base_time()))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_fill_returns_none() {
        let store = InMemoryOrderStore::new();
        store
            .insert_order(order("ord-1", OrderStatus::Filled))
            .await
            .unwrap();

        let fill = Fill::from_event(
            "ord-1",
            dec!(100),
            dec!(10),
            base_time(),
            FillSource::CasCallback,
            None,
        );
        assert!(store
            .append_fill_to_order_metadata("ord-1", fill.clone())
            .await
            .unwrap()
            .is_some());
        assert!(store
            .append_fill_to_order_metadata("ord-1", fill)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get_fills_for_order("ord-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_terminal_query_excludes_terminal() {
        let store = InMemoryOrderStore::new();
        store
            .insert_order(order("open", OrderStatus::Accepted))
            .await
            .unwrap();
        store
            .insert_order(order("done", OrderStatus::Filled))
            .await
            .unwrap();

        let active = store.get_non_terminal_orders().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].client_order_id, "open");
    }

    #[tokio::test]
    async fn test_terminal_orders_missing_fills() {
        let store = InMemoryOrderStore::new();
        let mut done = order("done", OrderStatus::Filled);
        done.filled_qty = dec!(100);
        store.insert_order(done).await.unwrap();

        let missing = store.get_terminal_orders_missing_fills().await.unwrap();
        assert_eq!(missing.len(), 1);

        let fill = Fill::from_event(
            "done",
            dec!(100),
            dec!(10),
            base_time(),
            FillSource::TerminalScan,
            None,
        );
        store
            .append_fill_to_order_metadata("done", fill)
            .await
            .unwrap();
        assert!(store
            .get_terminal_orders_missing_fills()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_pnl_recompute_is_reentrant() {
        let store = InMemoryOrderStore::new();
        let mut sell = order("sell-1", OrderStatus::Filled);
        sell.side = OrderSide::Sell;
        store.insert_order(sell).await.unwrap();

        let fill = Fill::from_event(
            "sell-1",
            dec!(10),
            dec!(25),
            base_time(),
            FillSource::ActivityFeed,
            Some("act-1".to_string()),
        );
        store
            .append_fill_to_order_metadata("sell-1", fill)
            .await
            .unwrap();

        let first = store
            .recalculate_trade_realized_pnl("momentum", "AAPL")
            .await
            .unwrap();
        let second = store
            .recalculate_trade_realized_pnl("momentum", "AAPL")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.realized_pnl("momentum", "AAPL"), Some(dec!(250)));
    }

    #[tokio::test]
    async fn test_orphan_create_then_duplicate() {
        let store = InMemoryOrderStore::new();
        let orphan = OrphanRecord {
            broker_order_id: "bkr-x".to_string(),
            client_order_id: "unknown-x".to_string(),
            symbol: "TSLA".to_string(),
            strategy_id: crate::models::UNKNOWN_STRATEGY.to_string(),
            broker_status: "accepted".to_string(),
            detected_at: base_time(),
        };
        assert!(store.create_orphan_order(orphan.clone()).await.unwrap());
        assert!(!store.create_orphan_order(orphan).await.unwrap());
    }
}
