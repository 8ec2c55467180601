// src/dag/state_manager.rs

//! Per-run state transitions: readiness, gate evaluation, skip propagation.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binding::substitute_results;
use crate::config::model::{WhenConfig, WhenOperator};
use crate::dag::graph::EdgeKind;
use crate::dag::plan_step::SkippedTask;
use crate::dag::task_state::{
    PipelineStatus, ResolvedStep, RunState, ScheduledTask, SkipKind, TaskState,
};
use crate::engine::TaskName;

/// How a single dependency edge looks from the dependent's point of view.
enum EdgeStatus {
    Satisfied,
    /// The predecessor is not terminal yet.
    Waiting,
    /// The predecessor reached a terminal state that can never satisfy this
    /// edge; the dependent must be skipped.
    Unsatisfiable(SkipKind, String),
}

/// Manages per-run state transitions for tasks in one execution plan.
pub struct StateManager<'a> {
    tasks: &'a mut BTreeMap<TaskName, TaskState>,
    run_id: Uuid,
}

impl<'a> StateManager<'a> {
    pub fn new(tasks: &'a mut BTreeMap<TaskName, TaskState>, run_id: Uuid) -> Self {
        Self { tasks, run_id }
    }

    /// Collect Pending tasks whose dependencies are settled.
    ///
    /// Tasks with a satisfied dependency set and a satisfied gate are marked
    /// Running and returned as `ScheduledTask`s; tasks with an unsatisfiable
    /// dependency or a failed gate are marked Skipped. Skips cascade, so the
    /// scan loops until a fixpoint.
    pub fn settle(&mut self) -> (Vec<ScheduledTask>, Vec<SkippedTask>) {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();

        loop {
            let mut changed = false;

            let pending: Vec<TaskName> = self
                .tasks
                .values()
                .filter(|t| t.state == RunState::Pending)
                .map(|t| t.name.clone())
                .collect();

            for name in pending {
                match self.edge_status_of(&name) {
                    EdgeStatus::Waiting => {}
                    EdgeStatus::Unsatisfiable(kind, reason) => {
                        self.mark_skipped(&name, kind, reason, &mut skipped);
                        changed = true;
                    }
                    EdgeStatus::Satisfied => {
                        match self.settle_ready_task(&name) {
                            SettledTask::Scheduled(task) => {
                                ready.push(task);
                            }
                            SettledTask::GateSkipped(reason) => {
                                self.mark_skipped(
                                    &name,
                                    SkipKind::GateUnsatisfied,
                                    reason,
                                    &mut skipped,
                                );
                            }
                            SettledTask::Failed(reason) => {
                                if let Some(info) = self.tasks.get_mut(&name) {
                                    warn!(
                                        task = %name,
                                        reason = %reason,
                                        "task failed while resolving bindings"
                                    );
                                    info.state = RunState::Failed;
                                    info.failure = Some(reason);
                                }
                            }
                        }
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        (ready, skipped)
    }

    /// Mark every still-Pending task as Cancelled (used when the run is
    /// cancelled or times out). Returns the affected task names.
    pub fn cancel_pending(&mut self) -> Vec<TaskName> {
        let mut cancelled = Vec::new();
        for info in self.tasks.values_mut() {
            if info.state == RunState::Pending {
                info.state = RunState::Cancelled;
                cancelled.push(info.name.clone());
            }
        }
        cancelled
    }

    /// Names of tasks currently in the Running state.
    pub fn running_tasks(&self) -> Vec<TaskName> {
        self.tasks
            .values()
            .filter(|t| t.state == RunState::Running)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|info| info.state.is_terminal())
    }

    /// Final status of the run once every task is terminal.
    ///
    /// A cancelled run is always Cancelled; otherwise any failed required
    /// task (or a task cancelled by its own timeout) fails the run, and a
    /// run whose tasks all succeeded or were legitimately skipped succeeds.
    pub fn final_status(&self, run_cancelled: bool) -> PipelineStatus {
        if run_cancelled {
            return PipelineStatus::Cancelled;
        }

        for info in self.tasks.values() {
            match info.state {
                RunState::Failed if !info.continue_on_failure => return PipelineStatus::Failed,
                RunState::Cancelled => return PipelineStatus::Failed,
                _ => {}
            }
        }

        PipelineStatus::Succeeded
    }

    /// Realized results of all Succeeded tasks, keyed by task name.
    pub fn results_view(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.tasks
            .values()
            .filter(|t| t.state == RunState::Succeeded)
            .map(|t| (t.name.clone(), t.results.clone()))
            .collect()
    }

    fn mark_skipped(
        &mut self,
        name: &str,
        kind: SkipKind,
        reason: String,
        out: &mut Vec<SkippedTask>,
    ) {
        let Some(info) = self.tasks.get_mut(name) else {
            warn!(task = %name, "cannot skip unknown task");
            return;
        };
        info!(
            task = %info.name,
            run_id = %self.run_id,
            reason = %reason,
            "skipping task"
        );
        info.state = RunState::Skipped;
        info.skip = Some((kind, reason.clone()));
        out.push(SkippedTask {
            name: name.to_string(),
            kind,
            reason,
        });
    }

    /// Combined status of all dependency edges of `task`.
    fn edge_status_of(&self, task: &str) -> EdgeStatus {
        let info = match self.tasks.get(task) {
            Some(i) => i,
            None => {
                warn!(task = %task, "task missing from plan; treating as waiting");
                return EdgeStatus::Waiting;
            }
        };

        for (dep_name, kind) in &info.deps {
            let dep = match self.tasks.get(dep_name) {
                Some(d) => d,
                None => {
                    warn!(task = %info.name, dep = %dep_name, "dependency missing from plan");
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::UpstreamSkipped,
                        format!("dependency '{dep_name}' is not part of this run"),
                    );
                }
            };

            match (dep.state, kind) {
                (RunState::Pending | RunState::Running, _) => return EdgeStatus::Waiting,

                (RunState::Succeeded, _) => {}

                // Ordering edges tolerate a gate-skipped predecessor and a
                // failed predecessor that opted into continue_on_failure.
                (RunState::Skipped, EdgeKind::Ordering)
                    if matches!(dep.skip, Some((SkipKind::GateUnsatisfied, _))) => {}
                (RunState::Failed, EdgeKind::Ordering) if dep.continue_on_failure => {}

                (RunState::Failed, EdgeKind::Ordering) => {
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::UpstreamFailed,
                        format!("dependency '{dep_name}' failed"),
                    );
                }
                (RunState::Failed, EdgeKind::Result) => {
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::ResultUnavailable,
                        format!("result of '{dep_name}' is unavailable: the task failed"),
                    );
                }
                (RunState::Cancelled, _) => {
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::UpstreamCancelled,
                        format!("dependency '{dep_name}' was cancelled"),
                    );
                }
                (RunState::Skipped, EdgeKind::Result) => {
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::ResultUnavailable,
                        format!("result of '{dep_name}' is unavailable: the task was skipped"),
                    );
                }
                (RunState::Skipped, EdgeKind::Ordering) => {
                    return EdgeStatus::Unsatisfiable(
                        SkipKind::UpstreamSkipped,
                        format!("dependency '{dep_name}' was skipped"),
                    );
                }
            }
        }

        EdgeStatus::Satisfied
    }

    /// Evaluate the gate and resolve step commands for a task whose
    /// dependencies are satisfied.
    fn settle_ready_task(&mut self, name: &str) -> SettledTask {
        let results = self.results_view();
        let Some(info) = self.tasks.get_mut(name) else {
            return SettledTask::Failed(format!("task '{name}' missing from plan"));
        };

        match evaluate_when(&info.when, &results) {
            Ok(true) => {}
            Ok(false) => {
                return SettledTask::GateSkipped("when gate not satisfied".to_string());
            }
            Err(reason) => {
                // A gate referencing an unavailable result cannot be
                // evaluated; the task is skipped rather than failed.
                return SettledTask::GateSkipped(reason);
            }
        }

        let mut steps = Vec::with_capacity(info.steps.len());
        for step in &info.steps {
            let command = match substitute_results(&step.command, &results) {
                Ok(c) => c,
                Err(e) => return SettledTask::Failed(e.to_string()),
            };
            let mut env = BTreeMap::new();
            for (k, v) in &step.env {
                match substitute_results(v, &results) {
                    Ok(resolved) => {
                        env.insert(k.clone(), resolved);
                    }
                    Err(e) => return SettledTask::Failed(e.to_string()),
                }
            }
            steps.push(ResolvedStep {
                name: step.name.clone(),
                image: step.image.clone(),
                command,
                env,
            });
        }

        debug!(
            task = %info.name,
            run_id = %self.run_id,
            steps = steps.len(),
            "dependencies satisfied; marking Running"
        );

        info.state = RunState::Running;
        SettledTask::Scheduled(ScheduledTask::from_state(info, self.run_id, steps))
    }
}

enum SettledTask {
    Scheduled(ScheduledTask),
    GateSkipped(String),
    Failed(String),
}

/// Evaluate a task's `when` gates against available results.
///
/// All gates must be satisfied. Returns `Err` with a reason when a gate input
/// references a result that is not available.
fn evaluate_when(
    gates: &[WhenConfig],
    results: &BTreeMap<String, BTreeMap<String, String>>,
) -> std::result::Result<bool, String> {
    for gate in gates {
        let input = substitute_results(&gate.input, results)
            .map_err(|_| format!("when gate input '{}' cannot be resolved", gate.input))?;

        let mut values = Vec::with_capacity(gate.values.len());
        for v in &gate.values {
            let resolved = substitute_results(v, results)
                .map_err(|_| format!("when gate value '{v}' cannot be resolved"))?;
            values.push(resolved);
        }

        let contained = values.iter().any(|v| *v == input);
        let satisfied = match gate.operator {
            WhenOperator::In => contained,
            WhenOperator::NotIn => !contained,
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}
