//! Error taxonomy for the reconciliation engine.
//!
//! Three categories drive handling at the cycle boundary:
//!
//! - **Broker connectivity** - retryable at cycle granularity; fatal only to
//!   a startup attempt.
//! - **Persistence** - same handling as broker connectivity.
//! - **Validation** - malformed broker payloads inside a cycle are handled
//!   like the above; override misuse is raised synchronously to the caller.
//!
//! CAS conflicts are deliberately *not* represented here: a rejected write is
//! the expected outcome of concurrent writers, counted and logged, never
//! propagated as a failure.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::store::StoreError;

/// Category names used in logs and cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network/auth failure talking to the broker.
    BrokerConnectivity,
    /// Connection/constraint failure in the local store.
    Persistence,
    /// Malformed payload or invalid caller arguments.
    Validation,
}

impl ErrorCategory {
    /// Stable string form for logging and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerConnectivity => "broker_connectivity",
            Self::Persistence => "persistence",
            Self::Validation => "validation",
        }
    }
}

/// Top-level error surfaced by reconciliation operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network/auth failure talking to the broker.
    #[error("broker connectivity: {0}")]
    BrokerConnectivity(String),

    /// Connection/constraint failure in the local store.
    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),

    /// Malformed broker payload or invalid caller arguments.
    #[error("validation: {0}")]
    Validation(String),
}

impl EngineError {
    /// The handling category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::BrokerConnectivity(_) => ErrorCategory::BrokerConnectivity,
            Self::Persistence(_) => ErrorCategory::Persistence,
            Self::Validation(_) => ErrorCategory::Validation,
        }
    }
}

impl From<BrokerError> for EngineError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidPayload { message } => Self::Validation(message),
            other => Self::BrokerConnectivity(other.to_string()),
        }
    }
}
