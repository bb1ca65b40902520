//! Order sync: the known and missing passes over non-terminal local orders.
//!
//! The known pass applies broker snapshots already fetched in bulk. The
//! missing pass handles local orders the bulk queries never mentioned: each
//! costs one individual broker lookup, capped per cycle, with a grace period
//! for freshly submitted orders the broker may not have registered yet.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cas::{self, CasOutcome};
use super::fills::FillRecorder;
use crate::broker::BrokerPort;
use crate::config::ReconciliationConfig;
use crate::error::EngineError;
use crate::models::{BrokerOrder, CasUpdate, OrderRecord, OrderStatus, SourcePriority};
use crate::observability;
use crate::store::OrderStore;

/// Tallies from the known pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct KnownOutcome {
    /// Local orders with a matching bulk snapshot.
    pub examined: usize,
    /// CAS writes accepted.
    pub updated: usize,
    /// CAS writes rejected by a dominant stored tuple.
    pub conflicts: usize,
}

/// Tallies from the missing pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissingOrderOutcome {
    /// Individual broker lookups performed.
    pub lookups: usize,
    /// Orders corrected from lookup results.
    pub updated: usize,
    /// Orders the broker denied knowing, marked failed.
    pub marked_failed: usize,
    /// Orders left alone inside the submission grace period.
    pub deferred: usize,
    /// Whether the per-cycle lookup cap cut the pass short.
    pub cap_reached: bool,
}

/// Apply already-fetched broker snapshots to the local orders they cover.
///
/// # Errors
///
/// Returns an error for persistence failures; CAS conflicts are counted and
/// continue.
pub async fn reconcile_known<S: OrderStore + ?Sized>(
    local: &[OrderRecord],
    broker_by_client: &HashMap<String, BrokerOrder>,
    store: &S,
    fills: &FillRecorder<'_, S>,
) -> Result<KnownOutcome, EngineError> {
    let mut outcome = KnownOutcome::default();

    for order in local {
        let Some(snapshot) = broker_by_client.get(&order.client_order_id) else {
            continue;
        };
        outcome.examined += 1;
        match cas::apply(store, snapshot, Some(fills)).await? {
            CasOutcome::Applied => outcome.updated += 1,
            CasOutcome::Conflict => outcome.conflicts += 1,
            CasOutcome::SkippedUnknownStatus => {}
        }
    }

    Ok(outcome)
}

/// Resolve non-terminal local orders absent from the bulk broker snapshots.
///
/// Each missing order costs one individual lookup against the broker, bounded
/// by `max_individual_lookups`; orders left over wait for the next cycle.
/// A found order goes through the usual CAS path. An order the broker denies
/// knowing is marked `Failed`, except while it sits inside the
/// submitted-unconfirmed grace period, where submission may simply not have
/// landed yet.
///
/// # Errors
///
/// Returns an error when a broker lookup or persistence call fails.
pub async fn reconcile_missing<S, B>(
    local: &[OrderRecord],
    broker_by_client: &HashMap<String, BrokerOrder>,
    store: &S,
    broker: &B,
    config: &ReconciliationConfig,
    now: DateTime<Utc>,
    fills: &FillRecorder<'_, S>,
) -> Result<MissingOrderOutcome, EngineError>
where
    S: OrderStore + ?Sized,
    B: BrokerPort + ?Sized,
{
    let mut outcome = MissingOrderOutcome::default();

    for order in local {
        if broker_by_client.contains_key(&order.client_order_id) {
            continue;
        }
        if outcome.lookups >= config.max_individual_lookups {
            outcome.cap_reached = true;
            warn!(
                cap = config.max_individual_lookups,
                "Individual lookup cap reached, remaining missing orders wait for next cycle"
            );
            break;
        }

        outcome.lookups += 1;
        observability::record_individual_lookup();
        let found = broker
            .get_order_by_client_id(&order.client_order_id)
            .await
            .map_err(EngineError::from)?;

        match found {
            Some(snapshot) => {
                if cas::apply(store, &snapshot, Some(fills)).await?.applied() {
                    outcome.updated += 1;
                }
            }
            None => {
                if order.status == OrderStatus::SubmittedUnconfirmed
                    && order.age_secs(now) < config.submitted_unconfirmed_grace_secs
                {
                    outcome.deferred += 1;
                    debug!(
                        client_order_id = %order.client_order_id,
                        age_secs = order.age_secs(now),
                        "Order within submission grace period, deferring"
                    );
                    continue;
                }
                if mark_failed(store, order).await? {
                    outcome.marked_failed += 1;
                    info!(
                        client_order_id = %order.client_order_id,
                        prior_status = ?order.status,
                        "Order unknown to broker, marked failed"
                    );
                }
            }
        }
    }

    Ok(outcome)
}

/// Bulk snapshots in terminal states for local orders the non-terminal
/// passes never touched.
///
/// Two cases land here. A local row inserted after the non-terminal set was
/// taken goes through the usual CAS entry point. A local row that is already
/// terminal gets the fill callback replayed against the snapshot, so an
/// order that closed without fill economics picks them up; the deterministic
/// fill id makes the replay a no-op when the fill was already captured.
///
/// # Errors
///
/// Returns an error for persistence failures.
pub async fn backfill_terminal<S: OrderStore + ?Sized>(
    broker_by_client: &HashMap<String, BrokerOrder>,
    non_terminal_ids: &HashMap<String, OrderRecord>,
    store: &S,
    fills: &FillRecorder<'_, S>,
) -> Result<usize, EngineError> {
    let mut updated = 0;

    for (client_id, snapshot) in broker_by_client {
        if non_terminal_ids.contains_key(client_id) {
            continue;
        }
        let Some(status) = OrderStatus::from_broker_str(&snapshot.status) else {
            continue;
        };
        if !status.is_terminal() {
            continue;
        }
        let Some(existing) = store.get_order(client_id).await? else {
            continue;
        };
        if existing.status.is_terminal() {
            if status.is_fillish() {
                fills.record_from_snapshot(snapshot, &existing).await?;
            }
            continue;
        }
        if cas::apply(store, snapshot, Some(fills)).await?.applied() {
            updated += 1;
        }
    }

    Ok(updated)
}

async fn mark_failed<S: OrderStore + ?Sized>(
    store: &S,
    order: &OrderRecord,
) -> Result<bool, EngineError> {
    // Dated at local creation time so any later genuine broker report about
    // this order dominates the failure marker.
    let update = CasUpdate {
        client_order_id: order.client_order_id.clone(),
        status: OrderStatus::Failed,
        broker_updated_at: order.created_at,
        status_rank: OrderStatus::Failed.rank(),
        source_priority: SourcePriority::Reconciliation,
        filled_qty: order.filled_qty,
        filled_avg_price: order.filled_avg_price,
        filled_at: order.filled_at,
        broker_order_id: order.broker_order_id.clone(),
    };
    let applied = store.update_order_status_cas(update).await?.is_some();
    if applied {
        observability::record_order_corrected();
    }
    Ok(applied)
}
