//! Orphan order records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A broker-observed order with no matching local record.
///
/// Used only for alerting and quarantine bookkeeping; an orphan is never
/// attributed to a real strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanRecord {
    /// Broker-assigned order ID.
    pub broker_order_id: String,
    /// Client order ID the broker reported (unknown locally).
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Quarantine sentinel attribution (see [`super::UNKNOWN_STRATEGY`]).
    pub strategy_id: String,
    /// Broker status string at detection time.
    pub broker_status: String,
    /// When the orphan was detected.
    pub detected_at: DateTime<Utc>,
}
