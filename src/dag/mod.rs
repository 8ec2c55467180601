// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`graph`] holds the directed acyclic graph of tasks, with ordering and
//!   result edges.
//! - [`plan`] resolves a validated pipeline definition into a fixed per-run
//!   execution plan and drives its state machine.
//! - [`task_state`] provides task state and scheduled task types.
//! - [`plan_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions (readiness, gates,
//!   skip propagation).

pub mod graph;
pub mod plan;
pub mod plan_step;
pub mod state_manager;
pub mod task_state;

pub use graph::{EdgeKind, TaskGraph};
pub use plan::ExecutionPlan;
pub use plan_step::{PlanStep, SkippedTask};
pub use task_state::{
    PipelineStatus, ResolvedStep, RunState, ScheduledTask, SkipKind, TaskState,
};
