//! Order types and the CAS dominance comparator.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created locally, not yet submitted.
    New,
    /// Order submitted, broker acknowledgment not yet observed.
    SubmittedUnconfirmed,
    /// Order accepted by broker.
    Accepted,
    /// Order partially filled.
    PartiallyFilled,
    /// Order never confirmed by the broker and given up on.
    Failed,
    /// Order canceled.
    Canceled,
    /// Order expired.
    Expired,
    /// Order rejected by broker.
    Rejected,
    /// Order completely filled.
    Filled,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Canceled | Self::Expired | Self::Rejected | Self::Filled
        )
    }

    /// Returns true if the order carries fill information worth recording.
    #[must_use]
    pub const fn is_fillish(&self) -> bool {
        matches!(self, Self::PartiallyFilled | Self::Filled)
    }

    /// Fixed lifecycle rank used by the CAS comparator.
    ///
    /// Terminal statuses rank above every non-terminal status; within each
    /// group the rank is a monotone proxy for lifecycle progress.
    #[must_use]
    pub const fn rank(&self) -> i32 {
        match self {
            Self::New => 10,
            Self::SubmittedUnconfirmed => 20,
            Self::Accepted => 30,
            Self::PartiallyFilled => 40,
            Self::Failed => 80,
            Self::Canceled => 85,
            Self::Expired => 86,
            Self::Rejected => 87,
            Self::Filled => 100,
        }
    }

    /// Parse a broker status string into a local status.
    ///
    /// Returns `None` for statuses the engine does not track.
    #[must_use]
    pub fn from_broker_str(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "new" | "pending_new" => Some(Self::SubmittedUnconfirmed),
            "accepted" | "accepted_for_bidding" | "pending_cancel" | "pending_replace" => {
                Some(Self::Accepted)
            }
            "partially_filled" => Some(Self::PartiallyFilled),
            "filled" => Some(Self::Filled),
            "canceled" | "cancelled" | "done_for_day" | "replaced" => Some(Self::Canceled),
            "rejected" | "stopped" | "suspended" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Which writer produced an order update. Lower value wins ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePriority {
    /// Manual operator action.
    Manual = 1,
    /// The reconciliation process.
    Reconciliation = 2,
    /// Inbound broker event webhook.
    Webhook = 3,
}

impl SourcePriority {
    /// Numeric tie-break value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        *self as u8
    }
}

/// The (timestamp, rank, priority) tuple the CAS comparator orders.
///
/// An incoming tuple must strictly dominate the stored tuple for a write to
/// be accepted; `source_priority` is compared lower-wins on ties of the
/// first two fields. An equal tuple is a conflict, not an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTuple {
    /// Authoritative broker timestamp for the update.
    pub broker_updated_at: DateTime<Utc>,
    /// Lifecycle rank of the status being written.
    pub status_rank: i32,
    /// Writer identity for tie-breaking.
    pub source_priority: SourcePriority,
}

impl Ord for UpdateTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.broker_updated_at
            .cmp(&other.broker_updated_at)
            .then_with(|| self.status_rank.cmp(&other.status_rank))
            // Lower priority value is more dominant, so the comparison flips.
            .then_with(|| other.source_priority.value().cmp(&self.source_priority.value()))
    }
}

impl PartialOrd for UpdateTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl UpdateTuple {
    /// Whether this tuple strictly dominates the stored one.
    #[must_use]
    pub fn dominates(&self, stored: &Self) -> bool {
        self > stored
    }
}

/// A locally persisted order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Client-generated idempotent key.
    pub client_order_id: String,
    /// Broker-assigned order ID, once accepted.
    pub broker_order_id: Option<String>,
    /// Instrument symbol.
    pub symbol: String,
    /// Strategy attribution.
    pub strategy_id: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested quantity.
    pub qty: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Lifecycle rank of the current status.
    pub status_rank: i32,
    /// Authoritative broker timestamp of the last accepted update.
    pub broker_updated_at: DateTime<Utc>,
    /// Writer that last produced an accepted update.
    pub source_priority: SourcePriority,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price.
    pub filled_avg_price: Option<Decimal>,
    /// Time of the last fill.
    pub filled_at: Option<DateTime<Utc>>,
    /// Local creation time (submission).
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    /// The stored tuple the CAS comparator evaluates incoming writes against.
    #[must_use]
    pub const fn update_tuple(&self) -> UpdateTuple {
        UpdateTuple {
            broker_updated_at: self.broker_updated_at,
            status_rank: self.status_rank,
            source_priority: self.source_priority,
        }
    }

    /// Age of the order in seconds relative to `now`.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_seconds().max(0)
    }
}

/// A single CAS write against the order store.
#[derive(Debug, Clone)]
pub struct CasUpdate {
    /// Target order.
    pub client_order_id: String,
    /// Status being written.
    pub status: OrderStatus,
    /// Comparison timestamp for the dominance check.
    pub broker_updated_at: DateTime<Utc>,
    /// Rank of `status` (derived via [`OrderStatus::rank`]).
    pub status_rank: i32,
    /// Writer identity.
    pub source_priority: SourcePriority,
    /// Cumulative filled quantity reported with the update.
    pub filled_qty: Decimal,
    /// Average fill price reported with the update.
    pub filled_avg_price: Option<Decimal>,
    /// Fill timestamp reported with the update.
    pub filled_at: Option<DateTime<Utc>>,
    /// Broker order ID, if known.
    pub broker_order_id: Option<String>,
}

impl CasUpdate {
    /// The incoming tuple for the dominance check.
    #[must_use]
    pub const fn update_tuple(&self) -> UpdateTuple {
        UpdateTuple {
            broker_updated_at: self.broker_updated_at,
            status_rank: self.status_rank,
            source_priority: self.source_priority,
        }
    }
}
