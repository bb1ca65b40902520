//! Fill records and the deterministic fill identity rule.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which backfill path produced a fill record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSource {
    /// Inline CAS callback at the moment a fill-bearing update was accepted.
    CasCallback,
    /// The broker's historical activity feed.
    ActivityFeed,
    /// Trailing scan of terminal orders still missing fill metadata.
    TerminalScan,
}

impl FillSource {
    /// Stable label used in logs and metric tags.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CasCallback => "cas_callback",
            Self::ActivityFeed => "activity_feed",
            Self::TerminalScan => "terminal_scan",
        }
    }
}

/// A fill attached to an order's metadata.
///
/// `fill_id` is derived from the event content, not from the channel that
/// observed it, so the same fill arriving over different paths collides and
/// the second application is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Deterministic identity of this fill.
    pub fill_id: String,
    /// Filled quantity reported by the event.
    pub qty: Decimal,
    /// Fill price reported by the event.
    pub price: Decimal,
    /// Time of the fill.
    pub filled_at: DateTime<Utc>,
    /// Which path observed the fill.
    pub source: FillSource,
    /// Upstream event ID (activity ID) when one exists, for traceability.
    pub source_event_id: Option<String>,
}

impl Fill {
    /// Derive the deterministic fill ID for an event.
    ///
    /// All three backfill paths use this same rule so replays of the same
    /// underlying event are recognized as duplicates.
    #[must_use]
    pub fn deterministic_id(
        client_order_id: &str,
        qty: Decimal,
        price: Decimal,
        filled_at: DateTime<Utc>,
    ) -> String {
        format!(
            "{client_order_id}:{}:{}:{}",
            qty.normalize(),
            price.normalize(),
            filled_at.timestamp_millis()
        )
    }

    /// Build a fill from event data, deriving its identity.
    #[must_use]
    pub fn from_event(
        client_order_id: &str,
        qty: Decimal,
        price: Decimal,
        filled_at: DateTime<Utc>,
        source: FillSource,
        source_event_id: Option<String>,
    ) -> Self {
        Self {
            fill_id: Self::deterministic_id(client_order_id, qty, price, filled_at),
            qty,
            price,
            filled_at,
            source,
            source_event_id,
        }
    }
}
