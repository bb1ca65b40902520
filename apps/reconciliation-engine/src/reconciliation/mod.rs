//! The reconciliation pipeline: CAS updates, order sync, orphan detection,
//! fill backfill, position reconciliation, the startup gate, and the cycle
//! orchestrator that sequences them.

pub mod cas;
pub mod fills;
pub mod gate;
pub mod orchestrator;
pub mod orphan;
pub mod positions;
pub mod report;
pub mod sync;

pub use cas::CasOutcome;
pub use fills::FillRecorder;
pub use gate::{OverrideContext, ReconciliationState, StartupGate};
pub use orchestrator::ReconciliationOrchestrator;
pub use orphan::{CacheError, QuarantineCache};
pub use report::{CycleCounts, CycleMode, CycleOutcome, CycleReport, CycleStatus};
