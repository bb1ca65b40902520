//! Domain types shared across the reconciliation engine.

mod broker;
mod fill;
mod order;
mod orphan;
mod position;

pub use broker::{Activity, ActivityPage, BrokerOrder};
pub use fill::{Fill, FillSource};
pub use order::{CasUpdate, OrderRecord, OrderSide, OrderStatus, SourcePriority, UpdateTuple};
pub use orphan::OrphanRecord;
pub use position::{BrokerPosition, PositionSnapshot};

/// Strategy attribution sentinel for quarantined orphan orders.
///
/// Orphans are never silently attributed to a real strategy.
pub const UNKNOWN_STRATEGY: &str = "UNKNOWN_STRATEGY";
