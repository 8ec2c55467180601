// src/engine/mod.rs

//! Orchestration engine.
//!
//! Ties the execution plan and the dispatch gate to the runtime event loop,
//! which reacts to task completions, cancellation requests and pipeline
//! timeouts. The synchronous scheduling core lives in [`core`]; the async
//! IO shell around it is [`runtime`].

use std::collections::BTreeMap;

use crate::exec::substrate::IsolationReport;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Outcome of a task run for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// All steps exited zero and every declared result was produced.
    Succeeded { results: BTreeMap<String, String> },
    /// A step failed, a declared result was missing, or isolation
    /// enforcement rejected the run.
    Failed { reason: String },
    /// The task was cancelled or exceeded its wall-clock budget.
    Cancelled { reason: String },
}

/// Full completion report from the step runner.
///
/// The core only consumes `outcome`; the isolation report and violations are
/// recorded on the task run record by the IO shell and later aggregated by
/// the compliance evaluator.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub outcome: TaskOutcome,
    pub isolation: Option<IsolationReport>,
    pub violations: Vec<String>,
}

/// Events flowing into the runtime from executors and the outside world.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A task finished with a concrete outcome.
    TaskCompleted {
        task: TaskName,
        completion: TaskCompletion,
    },
    /// The caller (or Ctrl-C) asked for the run to be cancelled.
    CancelRequested { reason: String },
    /// The pipeline-level wall-clock budget fired.
    PipelineTimedOut,
}

pub mod core;
pub mod event_handlers;
pub mod gate;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use gate::DispatchGate;
pub use runtime::{ProvenanceServices, RunReport, Runtime};
