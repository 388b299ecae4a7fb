// src/engine/mod.rs

//! The execution engine: pure scheduling state plus the async IO shell that
//! drives it (spec §4.1, §4.2, §5).

pub mod events;
pub mod orchestrator;
pub mod scheduler;

pub use events::{EventSink, RuntimeEvent};
pub use orchestrator::{OverallStatus, Orchestrator, RunResult, RunTranscript, TaskSummary};
pub use scheduler::{FailureReason, Scheduler, SchedulerOutcome};
