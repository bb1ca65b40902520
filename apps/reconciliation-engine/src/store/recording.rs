//! Shadow-mode store: captures writes without committing them.
//!
//! [`RecordingStore`] wraps any [`OrderStore`]. Reads see the wrapped store
//! merged with an in-memory overlay of writes made through this wrapper, so
//! a cycle observes its own writes the way it would inside a transaction.
//! The wrapped store itself is never mutated - [`RecordingStore::rollback`]
//! discards the overlay, which is the "transaction always rolled back" of
//! the offline verification harness.
//!
//! Every attempted write is logged as a [`WriteOp`]. Running a cycle twice
//! against the same baseline must produce identical sorted summaries; a
//! difference is an idempotency bug.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{OrderStore, PnlRecalcCounts, StoreError, evaluate_cas};
use crate::models::{CasUpdate, Fill, OrderRecord, OrphanRecord, PositionSnapshot};

/// One attempted write, normalized for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    /// Operation name (e.g. `update_order_status_cas`).
    pub operation: &'static str,
    /// Logical table touched.
    pub table: &'static str,
    /// Row key.
    pub key: String,
    /// Outcome or payload detail (e.g. `applied`, `conflict`, a status).
    pub detail: String,
}

impl WriteOp {
    /// Render the op as one summary line.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!("{} {} {} {}", self.operation, self.table, self.key, self.detail)
    }
}

#[derive(Debug, Default)]
struct Overlay {
    orders: HashMap<String, OrderRecord>,
    fills: HashMap<String, Vec<Fill>>,
    positions: HashMap<String, PositionSnapshot>,
    orphans: HashMap<String, OrphanRecord>,
    orphan_statuses: HashMap<String, String>,
    high_water_mark: Option<DateTime<Utc>>,
}

/// Write-capturing wrapper around an [`OrderStore`].
#[derive(Debug)]
pub struct RecordingStore<S> {
    inner: S,
    overlay: RwLock<Overlay>,
    writes: RwLock<Vec<WriteOp>>,
}

impl<S: OrderStore> RecordingStore<S> {
    /// Wrap a store.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            overlay: RwLock::new(Overlay::default()),
            writes: RwLock::new(Vec::new()),
        }
    }

    /// Discard the overlay and the write log: the rollback.
    pub fn rollback(&self) {
        if let Ok(mut overlay) = self.overlay.write() {
            *overlay = Overlay::default();
        }
        if let Ok(mut writes) = self.writes.write() {
            writes.clear();
        }
    }

    /// Sorted summary lines for every write attempted so far.
    ///
    /// Sorted because cycle internals iterate hash maps; the set of writes is
    /// deterministic, their emission order is not.
    #[must_use]
    pub fn write_summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .writes
            .read()
            .map(|w| w.iter().map(WriteOp::summary_line).collect())
            .unwrap_or_default();
        lines.sort();
        lines
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn record(&self, op: WriteOp) {
        if let Ok(mut writes) = self.writes.write() {
            writes.push(op);
        }
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Unavailable {
            message: "shadow overlay lock poisoned".to_string(),
        }
    }

    async fn merged_order(&self, client_order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        {
            let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
            if let Some(order) = overlay.orders.get(client_order_id) {
                return Ok(Some(order.clone()));
            }
        }
        self.inner.get_order(client_order_id).await
    }

    async fn merged_fills(&self, client_order_id: &str) -> Result<Vec<Fill>, StoreError> {
        let mut fills = self.inner.get_fills_for_order(client_order_id).await?;
        let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
        if let Some(extra) = overlay.fills.get(client_order_id) {
            fills.extend(extra.iter().cloned());
        }
        Ok(fills)
    }
}

#[async_trait]
impl<S: OrderStore> OrderStore for RecordingStore<S> {
    async fn insert_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        self.record(WriteOp {
            operation: "insert_order",
            table: "orders",
            key: order.client_order_id.clone(),
            detail: format!("{:?}", order.status),
        });
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        overlay.orders.insert(order.client_order_id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, client_order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        self.merged_order(client_order_id).await
    }

    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        {
            let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
            if let Some(order) = overlay
                .orders
                .values()
                .find(|o| o.broker_order_id.as_deref() == Some(broker_order_id))
            {
                return Ok(Some(order.clone()));
            }
        }
        self.inner.get_order_by_broker_order_id(broker_order_id).await
    }

    async fn update_order_status_cas(
        &self,
        update: CasUpdate,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let existing = self.merged_order(&update.client_order_id).await?;
        let outcome = existing.as_ref().and_then(|e| evaluate_cas(e, &update));
        self.record(WriteOp {
            operation: "update_order_status_cas",
            table: "orders",
            key: update.client_order_id.clone(),
            detail: match (&existing, &outcome) {
                (None, _) => "unknown_order".to_string(),
                (_, None) => format!("conflict:{:?}", update.status),
                (_, Some(_)) => format!("applied:{:?}", update.status),
            },
        });
        if let Some(updated) = &outcome {
            let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
            overlay
                .orders
                .insert(updated.client_order_id.clone(), updated.clone());
        }
        Ok(outcome)
    }

    async fn get_non_terminal_orders(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let mut merged: HashMap<String, OrderRecord> = self
            .inner
            .get_non_terminal_orders()
            .await?
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o))
            .collect();
        let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
        for (id, order) in &overlay.orders {
            if order.status.is_terminal() {
                merged.remove(id);
            } else {
                merged.insert(id.clone(), order.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn get_order_ids_by_client_ids(
        &self,
        client_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let mut known = self.inner.get_order_ids_by_client_ids(client_ids).await?;
        let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
        for id in client_ids {
            if overlay.orders.contains_key(id) {
                known.insert(id.clone());
            }
        }
        Ok(known)
    }

    async fn get_reconciliation_high_water_mark(
        &self,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        {
            let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
            if overlay.high_water_mark.is_some() {
                return Ok(overlay.high_water_mark);
            }
        }
        self.inner.get_reconciliation_high_water_mark().await
    }

    async fn set_reconciliation_high_water_mark(
        &self,
        mark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Detail is static: the mark is the cycle's start time, and a
        // run-varying value would break summary comparison across runs.
        self.record(WriteOp {
            operation: "set_reconciliation_high_water_mark",
            table: "reconciliation_state",
            key: "high_water_mark".to_string(),
            detail: "advanced".to_string(),
        });
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        overlay.high_water_mark = Some(mark);
        Ok(())
    }

    async fn create_orphan_order(&self, orphan: OrphanRecord) -> Result<bool, StoreError> {
        self.record(WriteOp {
            operation: "create_orphan_order",
            table: "orphan_orders",
            key: orphan.broker_order_id.clone(),
            detail: orphan.symbol.clone(),
        });
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        if overlay.orphans.contains_key(&orphan.broker_order_id) {
            return Ok(false);
        }
        overlay.orphans.insert(orphan.broker_order_id.clone(), orphan);
        Ok(true)
    }

    async fn update_orphan_order_status(
        &self,
        broker_order_id: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        self.record(WriteOp {
            operation: "update_orphan_order_status",
            table: "orphan_orders",
            key: broker_order_id.to_string(),
            detail: status.to_string(),
        });
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        overlay
            .orphan_statuses
            .insert(broker_order_id.to_string(), status.to_string());
        Ok(())
    }

    async fn upsert_position_snapshot(
        &self,
        snapshot: PositionSnapshot,
    ) -> Result<(), StoreError> {
        self.record(WriteOp {
            operation: "upsert_position_snapshot",
            table: "position_snapshots",
            key: snapshot.symbol.clone(),
            detail: snapshot.qty.to_string(),
        });
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        overlay.positions.insert(snapshot.symbol.clone(), snapshot);
        Ok(())
    }

    async fn get_position_snapshots(&self) -> Result<Vec<PositionSnapshot>, StoreError> {
        let mut merged: HashMap<String, PositionSnapshot> = self
            .inner
            .get_position_snapshots()
            .await?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
        for (symbol, snapshot) in &overlay.positions {
            merged.insert(symbol.clone(), snapshot.clone());
        }
        Ok(merged.into_values().collect())
    }

    async fn append_fill_to_order_metadata(
        &self,
        client_order_id: &str,
        fill: Fill,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let existing = self.merged_fills(client_order_id).await?;
        let duplicate = existing.iter().any(|f| f.fill_id == fill.fill_id);
        self.record(WriteOp {
            operation: "append_fill_to_order_metadata",
            table: "order_fills",
            key: fill.fill_id.clone(),
            detail: if duplicate { "duplicate".to_string() } else { "applied".to_string() },
        });
        if duplicate {
            return Ok(None);
        }
        let order = self.merged_order(client_order_id).await?;
        let Some(order) = order else {
            return Err(StoreError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            });
        };
        let mut overlay = self.overlay.write().map_err(|_| Self::lock_poisoned())?;
        overlay
            .fills
            .entry(client_order_id.to_string())
            .or_default()
            .push(fill);
        Ok(Some(order))
    }

    async fn get_fills_for_order(&self, client_order_id: &str) -> Result<Vec<Fill>, StoreError> {
        self.merged_fills(client_order_id).await
    }

    async fn get_terminal_orders_missing_fills(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let mut merged: HashMap<String, OrderRecord> = self
            .inner
            .get_terminal_orders_missing_fills()
            .await?
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o))
            .collect();
        {
            let overlay = self.overlay.read().map_err(|_| Self::lock_poisoned())?;
            for (id, order) in &overlay.orders {
                if order.status.is_terminal() && order.filled_qty > Decimal::ZERO {
                    merged.insert(id.clone(), order.clone());
                } else {
                    merged.remove(id);
                }
            }
        }
        let mut missing = Vec::new();
        for order in merged.into_values() {
            if self.merged_fills(&order.client_order_id).await?.is_empty() {
                missing.push(order);
            }
        }
        Ok(missing)
    }

    async fn recalculate_trade_realized_pnl(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<PnlRecalcCounts, StoreError> {
        self.record(WriteOp {
            operation: "recalculate_trade_realized_pnl",
            table: "trades",
            key: format!("{strategy_id}/{symbol}"),
            detail: String::new(),
        });
        // The recomputation itself is a derived write; the shadow run only
        // captures that it was attempted.
        Ok(PnlRecalcCounts::default())
    }
}
