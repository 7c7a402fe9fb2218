//! # Cabin Chaos
//!
//! Fault injection against a running cluster and detection of its
//! recovery.
//!
//! - [`FaultScheduler`] kills random members and relaunches them after a
//!   delay until a stop condition holds.
//! - [`ConvergenceDetector`] reads member logs and waits for the running
//!   members to agree on a leader in a newer term, reporting a
//!   [`SafetyViolation`](cabin_core::HarnessError::SafetyViolation) if two
//!   members name different leaders for the same term.
//! - [`ElectionExperiment`] combines the two to measure leader elections.

pub mod belief;
pub mod detector;
pub mod experiments;
pub mod log_event;
pub mod scheduler;

pub use belief::Belief;
pub use detector::{assess, collect_beliefs, ConvergenceDetector, StableLeader};
pub use experiments::{ElectionExperiment, ElectionReport, ElectionRow, ElectionTrial, FailoverRow};
pub use log_event::LogEvent;
pub use scheduler::{
    FailoverReport, FaultEvent, FaultEventKind, FaultRun, FaultSchedule, FaultScheduler,
    KillSchedule, PendingRelaunch, StopCondition, StopReason,
};
