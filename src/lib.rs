//! device-journey - journey orchestration and state convergence for mobile E2E tests
//!
//! Sequences journeys of steps with fail-fast semantics, polls the device UI
//! and logs until a target state is reached, correlates log events with
//! backend requests, and persists diagnostics when something fails.

pub mod cli;
pub mod commands;
pub mod common;
pub mod correlator;
pub mod device;
pub mod diagnostics;
pub mod journey;
pub mod orchestrator;
pub mod poller;
pub mod report;
pub mod scenario;
pub mod snapshot;

// Re-export commonly used types
pub use common::{Error, Result};
pub use correlator::{LogCorrelator, LogEvent, Pattern};
pub use device::Collaborators;
pub use journey::{Journey, JourneyResult, StepContext, StepOutcome, StepResult};
pub use orchestrator::Orchestrator;
pub use poller::{predicate, Outcome, Poller, Predicate, WaitKind, WaitSpec};
pub use report::Report;
pub use snapshot::{diff, Snapshot, StateDelta};
