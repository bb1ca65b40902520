//! CAS order updater: applies one broker-reported snapshot under
//! optimistic concurrency control.
//!
//! A write is issued only as "update if dominates"; a rejected write is the
//! expected outcome of concurrent writers and is counted, not raised. No
//! retries happen here - the next cycle re-evaluates with fresh data.

use chrono::Utc;
use tracing::{debug, warn};

use super::fills::FillRecorder;
use crate::error::EngineError;
use crate::models::{BrokerOrder, CasUpdate, SourcePriority};
use crate::observability;
use crate::store::OrderStore;

/// Outcome of one CAS application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write dominated and was accepted.
    Applied,
    /// The write did not strictly dominate; stored state wins.
    Conflict,
    /// The broker reported a status the engine does not track.
    SkippedUnknownStatus,
}

impl CasOutcome {
    /// Whether the store was changed.
    #[must_use]
    pub const fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Apply a single broker order snapshot to the local store.
///
/// Derives the status rank from the snapshot status and the comparison
/// timestamp from `updated_at`, falling back to `created_at`, then to the
/// current wall clock. On an accepted write that leaves the order filled or
/// partially filled, the fill recorder (when supplied) is invoked
/// synchronously - this is how fill metadata gets created when no separate
/// event-driven path observed the fill.
///
/// # Errors
///
/// Returns an error for persistence failures only; conflicts are an
/// [`CasOutcome::Conflict`], never an error.
pub async fn apply<S: OrderStore + ?Sized>(
    store: &S,
    snapshot: &BrokerOrder,
    fills: Option<&FillRecorder<'_, S>>,
) -> Result<CasOutcome, EngineError> {
    let Some(status) = crate::models::OrderStatus::from_broker_str(&snapshot.status) else {
        warn!(
            client_order_id = %snapshot.client_order_id,
            broker_status = %snapshot.status,
            "Broker reported an untracked status, skipping snapshot"
        );
        return Ok(CasOutcome::SkippedUnknownStatus);
    };

    let update = CasUpdate {
        client_order_id: snapshot.client_order_id.clone(),
        status,
        broker_updated_at: snapshot.comparison_timestamp(Utc::now()),
        status_rank: status.rank(),
        source_priority: SourcePriority::Reconciliation,
        filled_qty: snapshot.filled_qty,
        filled_avg_price: snapshot.filled_avg_price,
        filled_at: snapshot.filled_at,
        broker_order_id: Some(snapshot.broker_order_id.clone()),
    };

    match store.update_order_status_cas(update).await? {
        Some(record) => {
            observability::record_order_corrected();
            debug!(
                client_order_id = %record.client_order_id,
                status = ?record.status,
                "Order state corrected from broker snapshot"
            );
            if record.status.is_fillish() {
                if let Some(recorder) = fills {
                    recorder.record_from_snapshot(snapshot, &record).await?;
                }
            }
            Ok(CasOutcome::Applied)
        }
        None => {
            observability::record_conflict_skipped();
            warn!(
                client_order_id = %snapshot.client_order_id,
                broker_status = %snapshot.status,
                "CAS rejected broker snapshot, stored state dominates"
            );
            Ok(CasOutcome::Conflict)
        }
    }
}
