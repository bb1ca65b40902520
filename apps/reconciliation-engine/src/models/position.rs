//! Position snapshot types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Locally maintained net position for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Instrument symbol.
    pub symbol: String,
    /// Net quantity (negative for short).
    pub qty: Decimal,
    /// Average entry price.
    pub avg_entry_price: Decimal,
    /// When this snapshot was last written.
    pub updated_at: DateTime<Utc>,
}

/// Broker-reported net position for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Instrument symbol.
    pub symbol: String,
    /// Net quantity (negative for short).
    pub qty: Decimal,
    /// Average entry price.
    pub avg_entry_price: Decimal,
}
