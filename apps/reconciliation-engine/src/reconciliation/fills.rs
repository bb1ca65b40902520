//! Fill backfill: three discovery channels funneling into one idempotent
//! append.
//!
//! 1. Inline CAS callback, fired when a reconciliation write leaves an order
//!    filled or partially filled.
//! 2. Account activity feed, paged with a lookback window.
//! 3. Terminal scan, which synthesizes fill metadata for terminal filled
//!    orders with no recorded fills.
//!
//! All three derive the same deterministic fill id from the fill content, so
//! the same economic fill discovered twice collapses to one row regardless of
//! which channel saw it first.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::broker::BrokerPort;
use crate::config::ReconciliationConfig;
use crate::error::EngineError;
use crate::models::{BrokerOrder, Fill, FillSource, OrderRecord};
use crate::observability;
use crate::store::OrderStore;

const FILL_ACTIVITY_TYPE: &str = "FILL";

/// Records fills discovered inline by the CAS updater.
///
/// Kept as a struct rather than a closure so the append stays a plain
/// awaited call inside the CAS path.
pub struct FillRecorder<'a, S: OrderStore + ?Sized> {
    store: &'a S,
    applied: AtomicUsize,
}

impl<'a, S: OrderStore + ?Sized> FillRecorder<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self {
            store,
            applied: AtomicUsize::new(0),
        }
    }

    /// Number of fills this recorder actually appended (duplicates excluded).
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::Relaxed)
    }

    /// Record the fill implied by a broker snapshot that just passed CAS.
    ///
    /// Skips snapshots without an executed quantity or average price; those
    /// carry no fill economics to persist.
    ///
    /// # Errors
    ///
    /// Returns an error when the fill append or the realized P&L
    /// recalculation fails.
    pub async fn record_from_snapshot(
        &self,
        snapshot: &BrokerOrder,
        record: &OrderRecord,
    ) -> Result<bool, EngineError> {
        if snapshot.filled_qty <= rust_decimal::Decimal::ZERO {
            return Ok(false);
        }
        let Some(price) = snapshot.filled_avg_price else {
            return Ok(false);
        };
        let filled_at = snapshot
            .filled_at
            .or(record.filled_at)
            .unwrap_or(record.broker_updated_at);

        let fill = Fill::from_event(
            &record.client_order_id,
            snapshot.filled_qty,
            price,
            filled_at,
            FillSource::CasCallback,
            None,
        );
        let applied = self
            .store
            .append_fill_to_order_metadata(&record.client_order_id, fill)
            .await?
            .is_some();
        if applied {
            self.applied.fetch_add(1, Ordering::Relaxed);
            observability::record_fill_backfilled(FillSource::CasCallback.as_str());
            self.store
                .recalculate_trade_realized_pnl(&record.strategy_id, &record.symbol)
                .await?;
            debug!(
                client_order_id = %record.client_order_id,
                qty = %snapshot.filled_qty,
                price = %price,
                "Recorded fill from reconciliation snapshot"
            );
        }
        Ok(applied)
    }
}

/// Result of one activity-feed backfill pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivityBackfillOutcome {
    /// Activities inspected across all fetched pages.
    pub activities_seen: usize,
    /// Fills actually appended (duplicates excluded).
    pub fills_backfilled: usize,
    /// Feed pages fetched.
    pub pages_fetched: usize,
}

/// Replay the broker account activity feed and append any fills the
/// event-driven paths missed.
///
/// Pages forward from the reconciliation window start (or a configured
/// lookback when no window exists), matching each fill activity to a local
/// order by broker order id. Activities for unknown orders are skipped; the
/// orphan detector owns those.
///
/// # Errors
///
/// Returns an error when the broker feed or the store fails.
pub async fn backfill_from_activities<S, B>(
    store: &S,
    broker: &B,
    config: &ReconciliationConfig,
    window_start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<ActivityBackfillOutcome, EngineError>
where
    S: OrderStore + ?Sized,
    B: BrokerPort + ?Sized,
{
    let mut outcome = ActivityBackfillOutcome::default();
    if !config.fill_backfill_enabled {
        return Ok(outcome);
    }

    let after = window_start
        .unwrap_or_else(|| now - Duration::hours(config.fill_backfill_lookback_hours));
    let mut page_token: Option<String> = None;

    for _ in 0..config.fill_backfill_max_pages {
        let page = broker
            .get_account_activities(
                FILL_ACTIVITY_TYPE,
                after,
                now,
                config.fill_backfill_page_size,
                page_token.take(),
            )
            .await?;
        outcome.pages_fetched += 1;
        let page_len = page.activities.len();

        for activity in page.activities {
            outcome.activities_seen += 1;
            let Some(order) = store
                .get_order_by_broker_order_id(&activity.broker_order_id)
                .await?
            else {
                debug!(
                    broker_order_id = %activity.broker_order_id,
                    activity_id = %activity.id,
                    "Fill activity references no local order, skipping"
                );
                continue;
            };
            let fill = Fill::from_event(
                &order.client_order_id,
                activity.qty,
                activity.price,
                activity.transaction_time,
                FillSource::ActivityFeed,
                Some(activity.id.clone()),
            );
            if store
                .append_fill_to_order_metadata(&order.client_order_id, fill)
                .await?
                .is_some()
            {
                outcome.fills_backfilled += 1;
                observability::record_fill_backfilled(FillSource::ActivityFeed.as_str());
                store
                    .recalculate_trade_realized_pnl(&order.strategy_id, &order.symbol)
                    .await?;
                info!(
                    client_order_id = %order.client_order_id,
                    activity_id = %activity.id,
                    qty = %activity.qty,
                    "Backfilled fill from account activity"
                );
            }
        }

        match page.next_page_token {
            Some(token) if page_len > 0 => page_token = Some(token),
            _ => break,
        }
    }

    Ok(outcome)
}

/// Scan terminal filled orders with empty fill metadata and synthesize one
/// aggregate fill from the order's own filled quantity and average price.
///
/// Last-resort channel for orders whose fills were never observed by either
/// the CAS callback or the activity feed.
///
/// # Errors
///
/// Returns an error when the store fails.
pub async fn scan_missing_fills<S: OrderStore + ?Sized>(store: &S) -> Result<usize, EngineError> {
    let orders = store.get_terminal_orders_missing_fills().await?;
    let mut backfilled = 0;

    for order in orders {
        if order.filled_qty <= rust_decimal::Decimal::ZERO {
            continue;
        }
        let Some(price) = order.filled_avg_price else {
            warn!(
                client_order_id = %order.client_order_id,
                "Terminal filled order has no average price, cannot synthesize fill"
            );
            continue;
        };
        let filled_at = order.filled_at.unwrap_or(order.broker_updated_at);
        let fill = Fill::from_event(
            &order.client_order_id,
            order.filled_qty,
            price,
            filled_at,
            FillSource::TerminalScan,
            None,
        );
        if store
            .append_fill_to_order_metadata(&order.client_order_id, fill)
            .await?
            .is_some()
        {
            backfilled += 1;
            observability::record_fill_backfilled(FillSource::TerminalScan.as_str());
            store
                .recalculate_trade_realized_pnl(&order.strategy_id, &order.symbol)
                .await?;
            info!(
                client_order_id = %order.client_order_id,
                qty = %order.filled_qty,
                "Synthesized fill for terminal order with missing metadata"
            );
        }
    }

    Ok(backfilled)
}
