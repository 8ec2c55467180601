// src/dag/plan_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_state::{PipelineStatus, ScheduledTask, SkipKind};
use crate::engine::TaskName;

/// A task the scheduler decided to skip in this step.
#[derive(Debug, Clone)]
pub struct SkippedTask {
    pub name: TaskName,
    pub kind: SkipKind,
    pub reason: String,
}

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the plan and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct PlanStep {
    /// Tasks that became ready to dispatch as a result of this step.
    pub newly_ready: Vec<ScheduledTask>,
    /// Tasks that were newly marked Skipped in this step.
    pub newly_skipped: Vec<SkippedTask>,
    /// Pending tasks that became Cancelled without ever dispatching (run
    /// cancellation or pipeline timeout).
    pub newly_cancelled: Vec<TaskName>,
    /// Set when this step brought every task to a terminal state.
    pub finished: Option<PipelineStatus>,
}
