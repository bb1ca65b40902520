//! Prometheus metrics for the reconciliation engine.
//!
//! Counters are exposed for external scraping, never consumed internally -
//! cycle-level counts flow back to callers through `CycleReport`.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090"
                .parse()
                .expect("static default listen address is valid"),
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server exposing metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g. port in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Record a CAS update that corrected local order state.
pub fn record_order_corrected() {
    counter!("reconciliation_orders_corrected_total").increment(1);
}

/// Record a CAS write rejected as a conflict.
pub fn record_conflict_skipped() {
    counter!("reconciliation_conflicts_skipped_total").increment(1);
}

/// Record a detected orphan order.
///
/// Labeled by symbol to drive alerting on orphan accumulation.
pub fn record_orphan_detected(symbol: &str) {
    counter!(
        "reconciliation_orphans_detected_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record an individual broker lookup issued by the missing-order pass.
pub fn record_individual_lookup() {
    counter!("reconciliation_individual_lookups_total").increment(1);
}

/// Record a fill applied by one of the backfill paths.
pub fn record_fill_backfilled(source: &str) {
    counter!(
        "reconciliation_fills_backfilled_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a completed cycle.
pub fn record_cycle_completed(mode: &str, status: &str, duration_seconds: f64) {
    counter!(
        "reconciliation_cycles_total",
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "reconciliation_cycle_duration_seconds",
        "mode" => mode.to_string()
    )
    .record(duration_seconds);
}

/// Update the last-successful-cycle timestamp gauge.
pub fn update_last_successful_cycle(epoch_seconds: i64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("reconciliation_last_success_timestamp_seconds").set(epoch_seconds as f64);
}
