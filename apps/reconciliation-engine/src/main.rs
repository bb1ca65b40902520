//! Reconciliation Engine Binary
//!
//! Starts the broker reconciliation engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin reconciliation-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Broker API key
//! - `ALPACA_SECRET`: Broker API secret
//!
//! ## Optional
//! - `CONFIG_PATH`: Path to a YAML config file (defaults apply when unset)
//! - `ALPACA_BASE_URL`: Broker REST endpoint (default: paper trading)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use reconciliation_engine::broker::alpaca::{AlpacaBrokerAdapter, AlpacaConfig};
use reconciliation_engine::config::load_config;
use reconciliation_engine::observability;
use reconciliation_engine::reconciliation::{ReconciliationOrchestrator, StartupGate};
use reconciliation_engine::store::InMemoryOrderStore;
use tokio::signal;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();
    observability::init_tracing();

    tracing::info!("Starting reconciliation engine");

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = load_config(config_path.as_deref())?;
    tracing::info!(
        poll_interval_secs = config.reconciliation.poll_interval_secs,
        dry_run = config.reconciliation.dry_run,
        "Configuration loaded"
    );

    if let Err(e) = observability::init_metrics(&config.observability.metrics()) {
        tracing::warn!(error = %e, "Metrics exporter failed to start, continuing without it");
    }

    let broker = Arc::new(create_broker()?);
    let store = Arc::new(InMemoryOrderStore::new());
    let gate = Arc::new(StartupGate::new(config.reconciliation.dry_run));

    let orchestrator = Arc::new(ReconciliationOrchestrator::new(
        config.reconciliation.clone(),
        store,
        broker,
        Arc::clone(&gate),
        None,
    ));

    // Trading stays gated until this succeeds; the periodic loop keeps
    // retrying in startup mode if it does not.
    if let Err(e) = orchestrator.run_startup().await {
        tracing::warn!(error = %e, "Startup reconciliation failed, order flow stays gated");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let loop_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            orchestrator.run_periodic(shutdown_rx).await;
        })
    };

    tracing::info!(gate_open = gate.is_open(), "Reconciliation engine ready");

    wait_for_shutdown().await;
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;

    tracing::info!("Reconciliation engine stopped");
    Ok(())
}

/// Load .env file from the current directory or any ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Build the Alpaca adapter from environment variables.
fn create_broker() -> Result<AlpacaBrokerAdapter, Box<dyn std::error::Error>> {
    let api_key = std::env::var("ALPACA_KEY").unwrap_or_default();
    let api_secret = std::env::var("ALPACA_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        return Err("ALPACA_KEY and ALPACA_SECRET environment variables are required".into());
    }

    let mut alpaca_config = AlpacaConfig {
        api_key,
        api_secret,
        ..AlpacaConfig::default()
    };
    if let Ok(base_url) = std::env::var("ALPACA_BASE_URL") {
        alpaca_config.base_url = base_url;
    }

    let base_url = alpaca_config.base_url.clone();
    let broker = AlpacaBrokerAdapter::new(alpaca_config)?;
    tracing::info!(base_url = %base_url, "Alpaca broker adapter initialized");
    Ok(broker)
}

/// Wait for SIGTERM or SIGINT.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail at startup instead.
#[allow(clippy::expect_used)]
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
