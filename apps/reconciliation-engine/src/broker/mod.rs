//! Broker port consumed by the reconciliation core.

pub mod alpaca;

pub use alpaca::{AlpacaBrokerAdapter, AlpacaConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ActivityPage, BrokerOrder, BrokerPosition};

/// Status filter for bulk order queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderQueryStatus {
    /// Only currently open orders.
    Open,
    /// Open and closed orders.
    All,
}

impl OrderQueryStatus {
    /// Wire value for the query parameter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::All => "all",
        }
    }
}

/// Broker port error.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Network failure reaching the broker.
    #[error("broker network error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Authentication/authorization failure.
    #[error("broker auth error: {message}")]
    Auth {
        /// Error details.
        message: String,
    },

    /// Rate limit hit.
    #[error("broker rate limited: {message}")]
    RateLimited {
        /// Error details.
        message: String,
    },

    /// The broker returned a payload the engine cannot interpret.
    #[error("invalid broker payload: {message}")]
    InvalidPayload {
        /// Error details.
        message: String,
    },
}

/// Read-only broker contract the engine reconciles against.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Bulk order query.
    ///
    /// `after` restricts to orders updated after the given instant (the
    /// incremental window); `limit` caps the result set.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker call fails.
    async fn get_orders(
        &self,
        status: OrderQueryStatus,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Point lookup of one order by client order ID.
    ///
    /// Returns `None` when the broker has no record of the ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker call fails.
    async fn get_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError>;

    /// One page of the historical account-activity feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker call fails.
    async fn get_account_activities(
        &self,
        activity_type: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<ActivityPage, BrokerError>;

    /// All currently held positions.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker call fails.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
}
