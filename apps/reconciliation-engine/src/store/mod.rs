//! Persistence port consumed by the reconciliation core.
//!
//! The engine never speaks SQL directly; it drives this trait. The CAS
//! method is the single mutation path for order status - a write that does
//! not strictly dominate the stored (timestamp, rank, priority) tuple is
//! rejected by returning `None`, never merged.

mod memory;
mod recording;

pub use memory::InMemoryOrderStore;
pub use recording::{RecordingStore, WriteOp};

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CasUpdate, Fill, OrderRecord, OrphanRecord, PositionSnapshot};

/// Persistence error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store is unreachable (pool/connection failure).
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// A constraint rejected the write.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Error details.
        message: String,
    },

    /// The referenced order does not exist.
    #[error("order not found: {client_order_id}")]
    OrderNotFound {
        /// The missing order's client ID.
        client_order_id: String,
    },
}

/// Counts returned by a realized-P&L recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PnlRecalcCounts {
    /// Orders considered for the strategy/symbol pair.
    pub orders_scanned: usize,
    /// Fills folded into the recomputation.
    pub fills_considered: usize,
}

/// Persistence contract for orders, fills, positions, orphans, and the
/// reconciliation high-water mark.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a newly submitted order.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails or the ID already exists.
    async fn insert_order(&self, order: OrderRecord) -> Result<(), StoreError>;

    /// Fetch one order by client ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_order(&self, client_order_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// Fetch one order by broker-assigned ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// Atomically update an order's status if the incoming tuple strictly
    /// dominates the stored one.
    ///
    /// Returns the updated record on success, `None` on a CAS conflict
    /// (harmless no-op) or when the order is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error only for persistence failures, never for conflicts.
    async fn update_order_status_cas(
        &self,
        update: CasUpdate,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// All locally tracked non-terminal orders.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_non_terminal_orders(&self) -> Result<Vec<OrderRecord>, StoreError>;

    /// The subset of `client_ids` that exist locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_order_ids_by_client_ids(
        &self,
        client_ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Start timestamp of the last successful cycle, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_reconciliation_high_water_mark(
        &self,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Persist the high-water mark.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    async fn set_reconciliation_high_water_mark(
        &self,
        mark: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a newly detected orphan.
    ///
    /// Returns `false` when the orphan was already on record.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    async fn create_orphan_order(&self, orphan: OrphanRecord) -> Result<bool, StoreError>;

    /// Update bookkeeping status for a previously recorded orphan.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    async fn update_orphan_order_status(
        &self,
        broker_order_id: &str,
        status: &str,
    ) -> Result<(), StoreError>;

    /// Upsert the local position snapshot for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    async fn upsert_position_snapshot(
        &self,
        snapshot: PositionSnapshot,
    ) -> Result<(), StoreError>;

    /// All local position snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_position_snapshots(&self) -> Result<Vec<PositionSnapshot>, StoreError>;

    /// Append a fill to an order's metadata.
    ///
    /// Returns the updated record, or `None` when the fill ID was already
    /// applied - this is the idempotency enforcement point.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails or the order is unknown.
    async fn append_fill_to_order_metadata(
        &self,
        client_order_id: &str,
        fill: Fill,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// All fills recorded for an order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_fills_for_order(&self, client_order_id: &str) -> Result<Vec<Fill>, StoreError>;

    /// Terminal filled/partially-filled orders with no fill metadata yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_terminal_orders_missing_fills(&self) -> Result<Vec<OrderRecord>, StoreError>;

    /// Recompute realized P&L for a strategy/symbol pair from its complete
    /// fill set. Re-entrant by construction.
    ///
    /// # Errors
    ///
    /// Returns an error if the recomputation fails.
    async fn recalculate_trade_realized_pnl(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<PnlRecalcCounts, StoreError>;
}

/// Evaluate a CAS write against the currently stored record.
///
/// Returns the record that would result from accepting the write, or `None`
/// when the incoming tuple does not strictly dominate. Store adapters share
/// this so the dominance rule lives in exactly one place.
#[must_use]
pub fn evaluate_cas(existing: &OrderRecord, update: &CasUpdate) -> Option<OrderRecord> {
    if !update.update_tuple().dominates(&existing.update_tuple()) {
        return None;
    }

    let mut updated = existing.clone();
    updated.status = update.status;
    updated.status_rank = update.status_rank;
    updated.broker_updated_at = update.broker_updated_at;
    updated.source_priority = update.source_priority;
    updated.filled_qty = update.filled_qty;
    updated.filled_avg_price = update.filled_avg_price;
    updated.filled_at = update.filled_at;
    if update.broker_order_id.is_some() {
        updated.broker_order_id = update.broker_order_id.clone();
    }
    Some(updated)
}
