//! Observability: tracing initialization and Prometheus metrics.

mod metrics;
mod tracing;

pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_conflict_skipped, record_cycle_completed,
    record_fill_backfilled, record_individual_lookup, record_order_corrected,
    record_orphan_detected, update_last_successful_cycle,
};
pub use tracing::init_tracing;
