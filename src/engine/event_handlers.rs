// src/engine/event_handlers.rs

//! Per-event decisions of the scheduling core.

use std::collections::HashSet;

use crate::dag::{ExecutionPlan, PipelineStatus, ScheduledTask, SkippedTask};
use crate::engine::gate::DispatchGate;
use crate::engine::{TaskName, TaskOutcome};

/// An action the IO shell must carry out on the core's behalf.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Stop these currently running tasks.
    CancelRunning(Vec<TaskName>),
    /// The run reached a terminal status; finalize records and reporting.
    FinishRun(PipelineStatus),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Tasks newly marked Skipped; the shell records them.
    pub skipped: Vec<SkippedTask>,
    /// Tasks cancelled before they ever dispatched; the shell records them.
    pub cancelled: Vec<TaskName>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn running() -> Self {
        Self {
            commands: Vec::new(),
            skipped: Vec::new(),
            cancelled: Vec::new(),
            keep_running: true,
        }
    }
}

/// Kick off the run: settle the plan and dispatch the initial ready set.
pub fn handle_start(plan: &mut ExecutionPlan, gate: &mut DispatchGate) -> CoreStep {
    let step = plan.start();

    let mut out = CoreStep::running();
    out.skipped = step.newly_skipped;

    gate.push(step.newly_ready);
    let dispatch = gate.take_dispatchable();
    if !dispatch.is_empty() {
        out.commands.push(CoreCommand::DispatchTasks(dispatch));
    }

    // A pipeline of nothing but gate-skipped tasks finishes immediately.
    if let Some(status) = step.finished {
        out.commands.push(CoreCommand::FinishRun(status));
        out.keep_running = false;
    }

    out
}

/// Handle a task completion event.
pub fn handle_task_completion(
    plan: &mut ExecutionPlan,
    gate: &mut DispatchGate,
    task: &str,
    outcome: &TaskOutcome,
) -> CoreStep {
    gate.on_completion();
    let step = plan.complete(task, outcome);

    let mut out = CoreStep::running();
    out.skipped = step.newly_skipped;

    gate.push(step.newly_ready);
    let dispatch = gate.take_dispatchable();
    if !dispatch.is_empty() {
        out.commands.push(CoreCommand::DispatchTasks(dispatch));
    }

    if let Some(status) = step.finished {
        out.commands.push(CoreCommand::FinishRun(status));
        out.keep_running = false;
    }

    out
}

/// Handle a cancellation request or pipeline timeout.
///
/// Pending tasks become Cancelled immediately; tasks queued behind the
/// dispatch gate never started and are completed as Cancelled right here;
/// genuinely running tasks are handed back as a `CancelRunning` command and
/// the run finishes when their (cancelled) completions arrive.
pub fn handle_cancel(
    plan: &mut ExecutionPlan,
    gate: &mut DispatchGate,
    reason: &str,
) -> CoreStep {
    let queued = gate.drain_pending();
    let queued_names: HashSet<TaskName> = queued.iter().map(|t| t.name.clone()).collect();

    let (cancel_step, running) = plan.cancel();

    let mut out = CoreStep::running();
    out.skipped = cancel_step.newly_skipped;
    out.cancelled = cancel_step.newly_cancelled;

    // Tasks held behind the dispatch gate never started; complete them as
    // cancelled right here and record them like the never-dispatched ones.
    for task in &queued {
        let step = plan.complete(
            &task.name,
            &TaskOutcome::Cancelled {
                reason: format!("cancelled before dispatch: {reason}"),
            },
        );
        out.skipped.extend(step.newly_skipped);
        out.cancelled.push(task.name.clone());
    }

    let truly_running: Vec<TaskName> = running
        .into_iter()
        .filter(|name| !queued_names.contains(name))
        .collect();
    if !truly_running.is_empty() {
        out.commands.push(CoreCommand::CancelRunning(truly_running));
    }

    if let Some(status) = plan.status() {
        out.commands.push(CoreCommand::FinishRun(status));
        out.keep_running = false;
    }

    out
}
