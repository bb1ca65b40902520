//! Broker-reported snapshots consumed by the reconciliation engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A broker-reported order snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker-assigned order ID.
    pub broker_order_id: String,
    /// Client order ID echoed back by the broker.
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Broker status string (e.g. "filled", "partially_filled").
    pub status: String,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price, if any quantity filled.
    pub filled_avg_price: Option<Decimal>,
    /// Last broker-side update time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Broker-side creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Fill time, if terminal-filled.
    pub filled_at: Option<DateTime<Utc>>,
}

impl BrokerOrder {
    /// The comparison timestamp for a CAS write derived from this snapshot.
    ///
    /// `updated_at` when the broker supplied one, else `created_at`, else
    /// the supplied wall-clock fallback.
    #[must_use]
    pub fn comparison_timestamp(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.updated_at.or(self.created_at).unwrap_or(fallback)
    }
}

/// One entry from the broker's historical account-activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Broker-assigned activity ID (also the page cursor).
    pub id: String,
    /// Activity type (the engine only pulls fills).
    pub activity_type: String,
    /// Broker order ID the activity belongs to.
    pub broker_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Executed quantity.
    pub qty: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Execution time.
    pub transaction_time: DateTime<Utc>,
}

/// One page of the activity feed.
#[derive(Debug, Clone, Default)]
pub struct ActivityPage {
    /// Activities in this page, oldest first.
    pub activities: Vec<Activity>,
    /// Cursor for the next page, or `None` when exhausted.
    pub next_page_token: Option<String>,
}
