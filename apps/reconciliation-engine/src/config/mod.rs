//! Configuration for the reconciliation engine.
//!
//! Every tunable is an explicit named field; nothing is read from ambient
//! process state inside the engine. `main` loads this once (YAML file plus
//! environment overrides for credentials) and hands it to the orchestrator
//! at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation engine tunables.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Metrics listener settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Reconciliation engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Interval between periodic cycles, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Hard timeout for one cycle, in seconds.
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
    /// Hard cap on individual broker lookups per cycle.
    #[serde(default = "default_max_lookups")]
    pub max_individual_lookups: usize,
    /// Safety margin subtracted from the high-water mark when computing the
    /// incremental window, in seconds.
    #[serde(default = "default_overlap")]
    pub overlap_seconds: i64,
    /// Grace period before a submitted-unconfirmed order with no broker
    /// record is marked failed, in seconds.
    #[serde(default = "default_grace")]
    pub submitted_unconfirmed_grace_secs: i64,
    /// Enable the activity-feed fill backfill.
    #[serde(default = "default_fill_backfill_enabled")]
    pub fill_backfill_enabled: bool,
    /// Lookback for the first activity-feed pull, in hours.
    #[serde(default = "default_fill_backfill_lookback")]
    pub fill_backfill_lookback_hours: i64,
    /// Activity-feed page size.
    #[serde(default = "default_fill_backfill_page_size")]
    pub fill_backfill_page_size: usize,
    /// Maximum activity-feed pages per cycle.
    #[serde(default = "default_fill_backfill_max_pages")]
    pub fill_backfill_max_pages: usize,
    /// Result-set cap for bulk broker order queries.
    #[serde(default = "default_bulk_query_limit")]
    pub bulk_query_limit: usize,
    /// Short-circuit every cycle and open the startup gate immediately.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
            max_individual_lookups: default_max_lookups(),
            overlap_seconds: default_overlap(),
            submitted_unconfirmed_grace_secs: default_grace(),
            fill_backfill_enabled: default_fill_backfill_enabled(),
            fill_backfill_lookback_hours: default_fill_backfill_lookback(),
            fill_backfill_page_size: default_fill_backfill_page_size(),
            fill_backfill_max_pages: default_fill_backfill_max_pages(),
            bulk_query_limit: default_bulk_query_limit(),
            dry_run: false,
        }
    }
}

impl ReconciliationConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Cycle timeout as a [`Duration`].
    #[must_use]
    pub const fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

/// Metrics listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Bind address for the Prometheus exporter.
    #[serde(default = "default_metrics_addr")]
    pub metrics_listen_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_listen_addr: default_metrics_addr(),
        }
    }
}

impl ObservabilityConfig {
    /// Exporter settings, falling back to the default bind address when the
    /// configured one does not parse.
    #[must_use]
    pub fn metrics(&self) -> crate::observability::MetricsConfig {
        match self.metrics_listen_addr.parse() {
            Ok(listen_addr) => crate::observability::MetricsConfig { listen_addr },
            Err(_) => {
                tracing::warn!(
                    addr = %self.metrics_listen_addr,
                    "Invalid metrics listen address, using default"
                );
                crate::observability::MetricsConfig::default()
            }
        }
    }
}

const fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

const fn default_cycle_timeout() -> u64 {
    120
}

const fn default_max_lookups() -> usize {
    25
}

const fn default_overlap() -> i64 {
    300 // 5 minutes of replay margin
}

const fn default_grace() -> i64 {
    300
}

const fn default_fill_backfill_enabled() -> bool {
    true
}

const fn default_fill_backfill_lookback() -> i64 {
    24
}

const fn default_fill_backfill_page_size() -> usize {
    100
}

const fn default_fill_backfill_max_pages() -> usize {
    10
}

const fn default_bulk_query_limit() -> usize {
    500
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Load configuration from a YAML file.
///
/// A missing path loads defaults; a present but unreadable or malformed
/// file is an error.
///
/// # Errors
///
/// Returns [`ConfigError`] on read or parse failure.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_string(),
        source,
    })?;
    Ok(serde_yaml_bw::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconciliationConfig::default();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.max_individual_lookups, 25);
        assert_eq!(config.overlap_seconds, 300);
        assert_eq!(config.submitted_unconfirmed_grace_secs, 300);
        assert!(config.fill_backfill_enabled);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_missing_path_loads_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.reconciliation.poll_interval_secs, 300);
        assert_eq!(config.observability.metrics_listen_addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml_bw::from_str(
            "reconciliation:\n  poll_interval_secs: 60\n  dry_run: true\n",
        )
        .unwrap();
        assert_eq!(config.reconciliation.poll_interval_secs, 60);
        assert!(config.reconciliation.dry_run);
        // Untouched fields keep their defaults.
        assert_eq!(config.reconciliation.max_individual_lookups, 25);
    }
}
