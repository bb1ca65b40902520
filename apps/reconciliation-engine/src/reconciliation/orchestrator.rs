//! Cycle orchestrator: runs one reconciliation cycle end to end and drives
//! the startup and periodic schedules.
//!
//! A cycle is serialized behind an async lock so overlapping triggers (timer
//! plus operator request) never interleave their broker reads and store
//! writes. The incremental window is anchored on a persisted high-water mark
//! set to the cycle's start time, so activity during a cycle is re-examined
//! by the next one; the overlap margin absorbs broker timestamp skew.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::fills::FillRecorder;
use super::gate::StartupGate;
use super::orphan::QuarantineCache;
use super::report::{CycleCounts, CycleMode, CycleOutcome, CycleReport, CycleStatus};
use super::{fills, orphan, positions, sync};
use crate::broker::{BrokerPort, OrderQueryStatus};
use crate::config::ReconciliationConfig;
use crate::error::EngineError;
use crate::models::BrokerOrder;
use crate::observability;
use crate::store::OrderStore;

/// Owns the cycle pipeline and its schedule.
pub struct ReconciliationOrchestrator<S, B> {
    config: ReconciliationConfig,
    store: Arc<S>,
    broker: Arc<B>,
    gate: Arc<StartupGate>,
    cache: Option<Arc<dyn QuarantineCache>>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl<S, B> ReconciliationOrchestrator<S, B>
where
    S: OrderStore + 'static,
    B: BrokerPort + 'static,
{
    #[must_use]
    pub fn new(
        config: ReconciliationConfig,
        store: Arc<S>,
        broker: Arc<B>,
        gate: Arc<StartupGate>,
        cache: Option<Arc<dyn QuarantineCache>>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            gate,
            cache,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one reconciliation cycle under the cycle lock.
    ///
    /// The cycle is bounded by the configured timeout; a timed-out cycle
    /// fails with a broker-connectivity error since the dominant cause is a
    /// slow upstream. Every outcome, success or failure, is reported to the
    /// startup gate.
    ///
    /// # Errors
    ///
    /// Returns the first broker-connectivity or persistence error the cycle
    /// hit. CAS conflicts never fail a cycle.
    pub async fn run_reconciliation_once(
        &self,
        mode: CycleMode,
    ) -> Result<CycleReport, EngineError> {
        let _guard = self.cycle_lock.lock().await;
        let started_at = Utc::now();
        if mode == CycleMode::Startup {
            self.gate.mark_startup_attempted(started_at);
        }

        if self.config.dry_run {
            info!(mode = mode.as_str(), "Dry run enabled, cycle skipped");
            let report = CycleReport {
                status: CycleStatus::Skipped,
                mode,
                started_at,
                finished_at: Utc::now(),
                counts: CycleCounts::default(),
            };
            self.gate
                .record_cycle_outcome(CycleOutcome::from_report(&report));
            observability::record_cycle_completed(
                mode.as_str(),
                "skipped",
                duration_secs(report.started_at, report.finished_at),
            );
            return Ok(report);
        }

        let result = tokio::time::timeout(self.config.cycle_timeout(), self.run_cycle_body(mode))
            .await
            .map_err(|_| {
                EngineError::BrokerConnectivity(format!(
                    "reconciliation cycle exceeded {}s timeout",
                    self.config.cycle_timeout_secs
                ))
            })
            .and_then(|inner| inner);

        let finished_at = Utc::now();
        match result {
            Ok(counts) => {
                let report = CycleReport {
                    status: CycleStatus::Success,
                    mode,
                    started_at,
                    finished_at,
                    counts,
                };
                self.gate
                    .record_cycle_outcome(CycleOutcome::from_report(&report));
                observability::record_cycle_completed(
                    mode.as_str(),
                    "success",
                    duration_secs(started_at, finished_at),
                );
                observability::update_last_successful_cycle(finished_at.timestamp());
                info!(
                    mode = mode.as_str(),
                    examined = counts.orders_examined,
                    corrected = counts.orders_corrected,
                    conflicts = counts.conflicts_skipped,
                    orphans = counts.orphans_detected,
                    fills = counts.fills_backfilled,
                    positions = counts.positions_corrected,
                    duration_ms = (finished_at - started_at).num_milliseconds(),
                    "Reconciliation cycle completed"
                );
                Ok(report)
            }
            Err(err) => {
                self.gate.record_cycle_outcome(CycleOutcome::from_failure(
                    mode,
                    finished_at,
                    err.to_string(),
                ));
                observability::record_cycle_completed(
                    mode.as_str(),
                    "error",
                    duration_secs(started_at, finished_at),
                );
                error!(
                    mode = mode.as_str(),
                    category = err.category().as_str(),
                    error = %err,
                    "Reconciliation cycle failed"
                );
                Err(err)
            }
        }
    }

    async fn run_cycle_body(&self, mode: CycleMode) -> Result<CycleCounts, EngineError> {
        let started_at = Utc::now();
        let store = self.store.as_ref();
        let mut counts = CycleCounts::default();

        let mark = store.get_reconciliation_high_water_mark().await?;
        let window_start = mark.map(|m| m - Duration::seconds(self.config.overlap_seconds));

        let open = self
            .broker
            .get_orders(OrderQueryStatus::Open, self.config.bulk_query_limit, None)
            .await?;
        let windowed = match window_start {
            Some(since) => {
                self.broker
                    .get_orders(OrderQueryStatus::All, self.config.bulk_query_limit, Some(since))
                    .await?
            }
            None => Vec::new(),
        };
        let broker_by_client = merge_snapshots(open, windowed);

        let local = store.get_non_terminal_orders().await?;
        let fills = FillRecorder::new(store);

        let known = sync::reconcile_known(&local, &broker_by_client, store, &fills).await?;
        counts.orders_examined += known.examined;
        counts.orders_corrected += known.updated;
        counts.conflicts_skipped += known.conflicts;

        let missing = sync::reconcile_missing(
            &local,
            &broker_by_client,
            store,
            self.broker.as_ref(),
            &self.config,
            started_at,
            &fills,
        )
        .await?;
        counts.individual_lookups = missing.lookups;
        counts.orders_corrected += missing.updated;
        counts.marked_failed = missing.marked_failed;

        let broker_client_ids: Vec<String> = broker_by_client.keys().cloned().collect();
        let known_ids = store.get_order_ids_by_client_ids(&broker_client_ids).await?;
        let snapshots: Vec<BrokerOrder> = broker_by_client.values().cloned().collect();
        let orphans = orphan::detect(
            &snapshots,
            &known_ids,
            store,
            self.cache.as_deref(),
            started_at,
        )
        .await?;
        counts.orphans_detected = orphans.detected;

        let non_terminal: HashMap<String, crate::models::OrderRecord> = local
            .iter()
            .map(|o| (o.client_order_id.clone(), o.clone()))
            .collect();
        counts.orders_corrected +=
            sync::backfill_terminal(&broker_by_client, &non_terminal, store, &fills).await?;

        // Activity replay is additive; a feed outage must not fail the cycle.
        match fills::backfill_from_activities(
            store,
            self.broker.as_ref(),
            &self.config,
            window_start,
            started_at,
        )
        .await
        {
            Ok(outcome) => counts.fills_backfilled += outcome.fills_backfilled,
            Err(err) => warn!(error = %err, "Activity fill backfill failed, continuing cycle"),
        }

        counts.positions_corrected =
            positions::reconcile_positions(store, self.broker.as_ref(), started_at).await?;

        match fills::scan_missing_fills(store).await {
            Ok(n) => counts.fills_backfilled += n,
            Err(err) => warn!(error = %err, "Terminal fill scan failed, continuing cycle"),
        }
        counts.fills_backfilled += fills.applied_count();

        // Advanced only after everything above succeeded, and to the cycle
        // START time so work concurrent with this cycle lands in the next
        // window.
        store.set_reconciliation_high_water_mark(started_at).await?;

        Ok(counts)
    }

    /// Run the startup cycle, surfacing failure to the caller.
    ///
    /// # Errors
    ///
    /// Returns the cycle error; the gate stays closed and the periodic loop
    /// is expected to keep retrying.
    pub async fn run_startup(&self) -> Result<CycleReport, EngineError> {
        self.run_reconciliation_once(CycleMode::Startup).await
    }

    /// Periodic cycle loop. Failures are logged and the loop continues;
    /// exits when a shutdown signal arrives.
    pub async fn run_periodic(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let sleep_for = self.config.poll_interval() + jitter(self.config.poll_interval());
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown received, stopping reconciliation loop");
                    return;
                }
                () = tokio::time::sleep(sleep_for) => {}
            }

            let mode = if self.gate.is_open() {
                CycleMode::Periodic
            } else {
                // Keep retrying startup until the gate opens.
                CycleMode::Startup
            };
            if let Err(err) = self.run_reconciliation_once(mode).await {
                warn!(error = %err, "Periodic reconciliation cycle failed, will retry");
            }
        }
    }
}

fn duration_secs(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> f64 {
    (end - start).to_std().map_or(0.0, |d| d.as_secs_f64())
}

/// Merge bulk query results, deduplicating by client order ID. When the same
/// order appears in both queries the fresher snapshot wins.
fn merge_snapshots(
    open: Vec<BrokerOrder>,
    windowed: Vec<BrokerOrder>,
) -> HashMap<String, BrokerOrder> {
    let fallback = Utc::now();
    let mut merged: HashMap<String, BrokerOrder> = HashMap::new();
    for snapshot in open.into_iter().chain(windowed) {
        match merged.entry(snapshot.client_order_id.clone()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if snapshot.comparison_timestamp(fallback)
                    > slot.get().comparison_timestamp(fallback)
                {
                    slot.insert(snapshot);
                }
            }
        }
    }
    merged
}

/// Uniform jitter up to a tenth of the interval, spreading cycles of
/// multiple instances apart.
fn jitter(interval: std::time::Duration) -> std::time::Duration {
    let max_ms = u64::try_from((interval / 10).as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::from_millis(rand::rng().random_range(0..max_ms))
}
