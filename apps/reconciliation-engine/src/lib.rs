// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Reconciliation Engine - Rust Core Library
//!
//! Keeps the locally persisted record of orders, fills, and positions
//! consistent with the state the broker reports, treating the broker as the
//! source of truth for execution state and local state as the source of
//! truth for intent.
//!
//! # Modules
//!
//! - `models`: Order, fill, position, and orphan domain types, including the
//!   dominance tuple driving compare-and-set resolution
//! - `store`: The `OrderStore` port, an in-memory implementation, and a
//!   write-capturing wrapper for shadow verification
//! - `broker`: The `BrokerPort` trait and the Alpaca REST adapter
//! - `reconciliation`: CAS updates, order sync, orphan detection, fill
//!   backfill, position reconciliation, the startup gate, and the cycle
//!   orchestrator
//! - `config`: YAML configuration with environment overrides
//! - `observability`: Tracing setup and Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod reconciliation;
pub mod store;

pub use broker::{BrokerError, BrokerPort, OrderQueryStatus};
pub use config::{Config, ReconciliationConfig};
pub use error::{EngineError, ErrorCategory};
pub use models::{
    BrokerOrder, CasUpdate, Fill, FillSource, OrderRecord, OrderSide, OrderStatus, OrphanRecord,
    PositionSnapshot, SourcePriority, UpdateTuple,
};
pub use reconciliation::{
    CycleMode, CycleOutcome, CycleReport, CycleStatus, QuarantineCache,
    ReconciliationOrchestrator, StartupGate,
};
pub use store::{InMemoryOrderStore, OrderStore, RecordingStore, StoreError, WriteOp};
