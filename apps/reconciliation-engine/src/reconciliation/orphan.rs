//! Orphan detection: broker orders with no local counterpart.
//!
//! Orphans are quarantined under a sentinel strategy so they never feed
//! strategy accounting, and optionally mirrored into a shared cache so other
//! services can refuse to act on them.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::models::{BrokerOrder, OrphanRecord, UNKNOWN_STRATEGY};
use crate::observability;
use crate::store::OrderStore;

/// Cache update failure. Non-fatal for the cycle.
#[derive(Debug, thiserror::Error)]
#[error("quarantine cache error: {message}")]
pub struct CacheError {
    /// Error details.
    pub message: String,
}

/// Side channel notified when an orphan is quarantined.
#[async_trait::async_trait]
pub trait QuarantineCache: Send + Sync {
    /// Flag a broker order as quarantined for other services.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache update fails.
    async fn mark_orphaned(&self, record: &OrphanRecord) -> Result<(), CacheError>;
}

/// Tallies from one orphan detection pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrphanOutcome {
    /// Newly quarantined orphans.
    pub detected: usize,
    /// Orphans already on record whose status was refreshed.
    pub already_known: usize,
}

/// Scan broker snapshots for orders the engine never created.
///
/// An orphan is quarantined by persisting it under the sentinel strategy; a
/// later sighting of the same broker order refreshes its recorded status
/// instead of re-announcing it. Cache propagation is best effort: a cache
/// failure is logged and the cycle continues, since the persisted quarantine
/// row is the durable record.
///
/// # Errors
///
/// Returns an error for persistence failures.
pub async fn detect<S: OrderStore + ?Sized>(
    snapshots: &[BrokerOrder],
    known_client_ids: &HashSet<String>,
    store: &S,
    cache: Option<&dyn QuarantineCache>,
    now: DateTime<Utc>,
) -> Result<OrphanOutcome, EngineError> {
    let mut outcome = OrphanOutcome::default();

    for snapshot in snapshots {
        if known_client_ids.contains(&snapshot.client_order_id) {
            continue;
        }

        let record = OrphanRecord {
            broker_order_id: snapshot.broker_order_id.clone(),
            client_order_id: snapshot.client_order_id.clone(),
            symbol: snapshot.symbol.clone(),
            strategy_id: UNKNOWN_STRATEGY.to_string(),
            broker_status: snapshot.status.clone(),
            detected_at: now,
        };

        if store.create_orphan_order(record.clone()).await? {
            outcome.detected += 1;
            observability::record_orphan_detected(&record.symbol);
            info!(
                broker_order_id = %record.broker_order_id,
                client_order_id = %record.client_order_id,
                symbol = %record.symbol,
                broker_status = %record.broker_status,
                "Quarantined broker order with no local counterpart"
            );
            if let Some(cache) = cache {
                if let Err(err) = cache.mark_orphaned(&record).await {
                    error!(
                        broker_order_id = %record.broker_order_id,
                        error = %err,
                        "Failed to propagate orphan to quarantine cache"
                    );
                }
            }
        } else {
            outcome.already_known += 1;
            store
                .update_orphan_order_status(&record.broker_order_id, &record.broker_status)
                .await?;
            debug!(
                broker_order_id = %record.broker_order_id,
                broker_status = %record.broker_status,
                "Orphan seen again, refreshed quarantined status"
            );
        }
    }

    Ok(outcome)
}
