//! Cycle reports and outcome snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which scheduling context ran the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    /// The one-time startup cycle.
    Startup,
    /// A periodic steady-state cycle.
    Periodic,
}

impl CycleMode {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Periodic => "periodic",
        }
    }
}

/// Outcome of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// The cycle ran and committed its high-water mark.
    Success,
    /// Dry-run mode short-circuited the cycle body.
    Skipped,
}

/// Counts accumulated by one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    /// Local non-terminal orders considered.
    pub orders_examined: usize,
    /// CAS updates accepted.
    pub orders_corrected: usize,
    /// CAS writes rejected as conflicts.
    pub conflicts_skipped: usize,
    /// Individual broker lookups issued by the missing-order pass.
    pub individual_lookups: usize,
    /// Submitted-unconfirmed orders transitioned to failed.
    pub marked_failed: usize,
    /// Broker orders with no local counterpart.
    pub orphans_detected: usize,
    /// Fills applied across all backfill paths.
    pub fills_backfilled: usize,
    /// Position snapshots corrected.
    pub positions_corrected: usize,
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Outcome.
    pub status: CycleStatus,
    /// Scheduling context.
    pub mode: CycleMode,
    /// Cycle start time (this becomes the next high-water mark).
    pub started_at: DateTime<Utc>,
    /// Cycle end time.
    pub finished_at: DateTime<Utc>,
    /// Accumulated counts.
    pub counts: CycleCounts,
}

/// Snapshot of a cycle attempt kept by the startup gate, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    /// Scheduling context of the attempt.
    pub mode: CycleMode,
    /// Whether the cycle committed.
    pub succeeded: bool,
    /// When the attempt finished.
    pub completed_at: DateTime<Utc>,
    /// Categorized error description for failures.
    pub error: Option<String>,
    /// Counts for successful cycles.
    pub counts: CycleCounts,
}

impl CycleOutcome {
    /// Snapshot a successful report.
    #[must_use]
    pub fn from_report(report: &CycleReport) -> Self {
        Self {
            mode: report.mode,
            succeeded: true,
            completed_at: report.finished_at,
            error: None,
            counts: report.counts,
        }
    }

    /// Snapshot a failed attempt.
    #[must_use]
    pub fn from_failure(mode: CycleMode, completed_at: DateTime<Utc>, error: String) -> Self {
        Self {
            mode,
            succeeded: false,
            completed_at,
            error: Some(error),
            counts: CycleCounts::default(),
        }
    }
}
