// src/dag/task_state.rs

//! Per-run task state and scheduled task types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::model::{IsolationSpec, StepConfig, WhenConfig};
use crate::engine::TaskName;

/// Status of a task run.
///
/// Transitions are monotonic: Pending → Running → one of the terminal states,
/// or Pending → {Skipped, Cancelled} directly. There are no reverse
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Terminal and non-erroring: an unsatisfied gate or an unsatisfiable
    /// predecessor took this task out of the run.
    Skipped,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled | RunState::Skipped
        )
    }
}

/// Why a task ended up Skipped.
///
/// Only [`SkipKind::GateUnsatisfied`] counts as a satisfied predecessor for
/// ordering edges; every other kind propagates the skip downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// The task's own `when` gate evaluated to false.
    GateUnsatisfied,
    /// A predecessor failed.
    UpstreamFailed,
    /// A predecessor was cancelled.
    UpstreamCancelled,
    /// A predecessor was skipped for a non-gate reason.
    UpstreamSkipped,
    /// A referenced result is unavailable because its producer did not
    /// succeed.
    ResultUnavailable,
}

/// Status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Static task information resolved from the definition at run creation,
/// plus mutable per-run state.
///
/// Step commands and `when` gates have pipeline/task parameters already
/// substituted; result references stay symbolic until the producing tasks
/// succeed.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub name: TaskName,
    pub steps: Vec<StepConfig>,
    pub when: Vec<WhenConfig>,
    pub declared_results: Vec<String>,
    pub workspaces: Vec<String>,
    pub isolation: IsolationSpec,
    pub continue_on_failure: bool,
    pub timeout: Option<Duration>,
    /// Direct dependencies with edge kinds, copied from the graph.
    pub deps: Vec<(TaskName, crate::dag::EdgeKind)>,

    pub state: RunState,
    pub skip: Option<(SkipKind, String)>,
    pub failure: Option<String>,
    /// Realized results; written exactly once, when the task succeeds.
    pub results: BTreeMap<String, String>,
}

/// A step with every reference substituted, ready for the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub name: String,
    pub image: Option<String>,
    pub command: String,
    pub env: BTreeMap<String, String>,
}

/// Description of a task the scheduler wants dispatched now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: TaskName,
    /// Pipeline run this task belongs to.
    pub run_id: Uuid,
    pub steps: Vec<ResolvedStep>,
    pub declared_results: Vec<String>,
    pub workspaces: Vec<String>,
    pub isolation: IsolationSpec,
    pub timeout: Option<Duration>,
}

impl ScheduledTask {
    pub fn from_state(info: &TaskState, run_id: Uuid, steps: Vec<ResolvedStep>) -> Self {
        Self {
            name: info.name.clone(),
            run_id,
            steps,
            declared_results: info.declared_results.clone(),
            workspaces: info.workspaces.clone(),
            isolation: info.isolation,
            timeout: info.timeout,
        }
    }
}
