//! Startup gate: trading stays blocked until a reconciliation cycle
//! succeeds, or an operator forces the gate open with an audited override.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::report::CycleOutcome;
use crate::error::EngineError;

/// Audit trail for a forced gate override.
#[derive(Debug, Clone)]
pub struct OverrideContext {
    /// Who forced the gate.
    pub operator: String,
    /// Why the gate was forced.
    pub reason: String,
    /// When the override happened.
    pub at: DateTime<Utc>,
    /// Outcome of the most recent cycle attempt at override time, if any.
    pub last_result: Option<CycleOutcome>,
}

/// Observable gate state.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    /// Whether order flow is unblocked.
    pub startup_complete: bool,
    /// When the first startup cycle attempt began.
    pub startup_started_at: Option<DateTime<Utc>>,
    /// Whether the gate was opened by an operator override.
    pub override_active: bool,
    /// Audit context of the override, when one happened.
    pub override_context: Option<OverrideContext>,
    /// Outcome of the most recent cycle.
    pub last_result: Option<CycleOutcome>,
}

/// Gate consulted by order submission before any order leaves the engine.
pub struct StartupGate {
    state: Mutex<ReconciliationState>,
}

impl StartupGate {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        let mut state = ReconciliationState::default();
        if dry_run {
            // Nothing to reconcile against when writes are disabled.
            state.startup_complete = true;
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReconciliationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether order flow is currently allowed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().startup_complete
    }

    /// Snapshot of the current gate state.
    #[must_use]
    pub fn state(&self) -> ReconciliationState {
        self.lock().clone()
    }

    /// Record that a startup cycle attempt has begun.
    pub fn mark_startup_attempted(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        if state.startup_started_at.is_none() {
            state.startup_started_at = Some(at);
        }
    }

    /// Record the outcome of a cycle. A successful cycle opens the gate.
    pub fn record_cycle_outcome(&self, outcome: CycleOutcome) {
        let mut state = self.lock();
        if outcome.succeeded && !state.startup_complete {
            state.startup_complete = true;
            info!("Startup reconciliation succeeded, order flow unblocked");
        }
        state.last_result = Some(outcome);
    }

    /// Force the gate open despite reconciliation not having succeeded.
    ///
    /// Requires that a startup attempt was actually made first, plus a named
    /// operator and reason; the override is recorded for audit.
    ///
    /// # Errors
    ///
    /// Returns a validation error when no startup attempt preceded the
    /// override or when operator or reason is blank.
    pub fn force_open(&self, operator: &str, reason: &str) -> Result<(), EngineError> {
        let operator = operator.trim();
        let reason = reason.trim();
        if operator.is_empty() || reason.is_empty() {
            return Err(EngineError::Validation(
                "gate override requires a non-empty operator and reason".to_string(),
            ));
        }

        let mut state = self.lock();
        if state.startup_started_at.is_none() {
            return Err(EngineError::Validation(
                "gate override refused: no startup reconciliation attempt has been made".to_string(),
            ));
        }
        if state.startup_complete && !state.override_active {
            // Already open normally. Nothing to override.
            return Ok(());
        }

        let context = OverrideContext {
            operator: operator.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
            last_result: state.last_result.clone(),
        };
        warn!(
            operator = %context.operator,
            reason = %context.reason,
            "Startup gate forced open by operator override"
        );
        state.startup_complete = true;
        state.override_active = true;
        state.override_context = Some(context);
        Ok(())
    }
}
