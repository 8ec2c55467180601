// src/dag/plan.rs

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binding::substitute_params;
use crate::config::model::{ConfigFile, StepConfig, WhenConfig};
use crate::dag::graph::TaskGraph;
use crate::dag::plan_step::PlanStep;
use crate::dag::state_manager::StateManager;
use crate::dag::task_state::{PipelineStatus, RunState, TaskState};
use crate::engine::{TaskName, TaskOutcome};
use crate::errors::{EngineError, Result};
use crate::types::parse_duration;

/// A pipeline definition resolved into a fixed, per-run execution plan.
///
/// The plan is created once at run creation (parameters bound, edges fixed,
/// step templates parameter-substituted) and then driven purely by
/// [`ExecutionPlan::start`], [`ExecutionPlan::complete`] and
/// [`ExecutionPlan::cancel`]. It holds no channels, no Tokio types, and
/// performs no IO, so the whole scheduling semantics can be unit tested
/// synchronously.
#[derive(Debug)]
pub struct ExecutionPlan {
    run_id: Uuid,
    pipeline: String,
    pipeline_version: String,
    tasks: BTreeMap<TaskName, TaskState>,
    /// Bound pipeline parameters (declared defaults overlaid with caller
    /// overrides).
    params: BTreeMap<String, String>,
    /// Declared pipeline results: name to source expression.
    result_exprs: BTreeMap<String, String>,
    started: bool,
    cancelled: bool,
    finished: Option<PipelineStatus>,
}

impl ExecutionPlan {
    /// Resolve a validated config plus caller parameter overrides into an
    /// execution plan.
    ///
    /// Rejected here (DefinitionError): overrides for undeclared parameters,
    /// declared parameters without a value, and unresolvable parameter
    /// references inside task definitions.
    pub fn new(
        cfg: &ConfigFile,
        run_id: Uuid,
        overrides: BTreeMap<String, String>,
    ) -> Result<Self> {
        let params = bind_parameters(cfg, overrides)?;
        let graph = TaskGraph::from_config(cfg);

        let mut tasks = BTreeMap::new();
        for (name, tc) in cfg.task.iter() {
            // Effective parameters for this task: pipeline parameters overlaid
            // with the task's own bindings (which may themselves reference
            // pipeline parameters).
            let mut effective = params.clone();
            for (k, v) in tc.params.iter() {
                effective.insert(k.clone(), substitute_params(v, &params)?);
            }

            let steps = tc
                .steps
                .iter()
                .map(|s| {
                    Ok(StepConfig {
                        name: s.name.clone(),
                        image: s.image.clone(),
                        command: substitute_params(&s.command, &effective)?,
                        env: s
                            .env
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), substitute_params(v, &effective)?)))
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let when = tc
                .when
                .iter()
                .map(|w| {
                    Ok(WhenConfig {
                        input: substitute_params(&w.input, &effective)?,
                        operator: w.operator,
                        values: w
                            .values
                            .iter()
                            .map(|v| substitute_params(v, &effective))
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let timeout = match tc.timeout.as_deref().or(cfg.engine.task_timeout.as_deref()) {
                Some(s) => Some(parse_duration(s).map_err(EngineError::Definition)?),
                None => None,
            };

            tasks.insert(
                name.clone(),
                TaskState {
                    name: name.clone(),
                    steps,
                    when,
                    declared_results: tc.results.keys().cloned().collect(),
                    workspaces: tc.workspaces.clone(),
                    isolation: tc.isolation,
                    continue_on_failure: tc.continue_on_failure,
                    timeout,
                    deps: graph.dependencies_of(name).to_vec(),
                    state: RunState::Pending,
                    skip: None,
                    failure: None,
                    results: BTreeMap::new(),
                },
            );
        }

        Ok(Self {
            run_id,
            pipeline: cfg.pipeline.name.clone(),
            pipeline_version: cfg.pipeline.version.clone(),
            tasks,
            params,
            result_exprs: cfg.pipeline.results.clone(),
            started: false,
            cancelled: false,
            finished: None,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }

    pub fn pipeline_version(&self) -> &str {
        &self.pipeline_version
    }

    /// Bound pipeline parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    /// Current state of the given task, or `None` if it is unknown.
    pub fn state_of(&self, task: &str) -> Option<RunState> {
        self.tasks.get(task).map(|t| t.state)
    }

    /// Requested isolation for a task.
    pub fn isolation_of(&self, task: &str) -> Option<crate::config::model::IsolationSpec> {
        self.tasks.get(task).map(|t| t.isolation)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn status(&self) -> Option<PipelineStatus> {
        self.finished
    }

    /// Begin the run: every task joins the run as Pending, and tasks whose
    /// dependency set is empty (or immediately settled) are dispatched.
    pub fn start(&mut self) -> PlanStep {
        if self.started {
            warn!(run_id = %self.run_id, "plan already started; ignoring");
            return PlanStep::default();
        }
        self.started = true;

        info!(
            run_id = %self.run_id,
            pipeline = %self.pipeline,
            tasks = self.tasks.len(),
            "starting pipeline run"
        );

        self.settle_and_check()
    }

    /// Record a task completion reported by the executor and settle the plan.
    pub fn complete(&mut self, task: &str, outcome: &TaskOutcome) -> PlanStep {
        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return PlanStep::default();
        };

        if info.state != RunState::Running {
            warn!(
                task = %task,
                state = ?info.state,
                "completion for task that is not Running; ignoring"
            );
            return PlanStep::default();
        }

        match outcome {
            TaskOutcome::Succeeded { results } => {
                info.state = RunState::Succeeded;
                info.results = results.clone();
                debug!(task = %task, run_id = %self.run_id, "task completed successfully");
            }
            TaskOutcome::Failed { reason } => {
                info.state = RunState::Failed;
                info.failure = Some(reason.clone());
                warn!(
                    task = %task,
                    run_id = %self.run_id,
                    reason = %reason,
                    "task failed; dependents will be skipped"
                );
            }
            TaskOutcome::Cancelled { reason } => {
                info.state = RunState::Cancelled;
                info.failure = Some(reason.clone());
                warn!(
                    task = %task,
                    run_id = %self.run_id,
                    reason = %reason,
                    "task cancelled"
                );
            }
        }

        self.settle_and_check()
    }

    /// Cancel the run: Pending tasks become Cancelled immediately and the
    /// names of still-Running tasks are returned so the caller can stop them.
    ///
    /// The run finishes once those running tasks report their (cancelled)
    /// completions; if nothing is running the run finishes right away.
    pub fn cancel(&mut self) -> (PlanStep, Vec<TaskName>) {
        self.cancelled = true;

        let mut manager = StateManager::new(&mut self.tasks, self.run_id);
        let newly_cancelled = manager.cancel_pending();
        let running = manager.running_tasks();

        info!(
            run_id = %self.run_id,
            cancelled = newly_cancelled.len(),
            running = running.len(),
            "cancelling pipeline run"
        );

        let mut step = PlanStep {
            newly_cancelled,
            ..PlanStep::default()
        };
        if manager.all_tasks_terminal() {
            let status = manager.final_status(true);
            self.finished = Some(status);
            step.finished = Some(status);
        }

        (step, running)
    }

    /// Results view for resolving pipeline-level result expressions.
    pub fn task_results(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.tasks
            .values()
            .filter(|t| t.state == RunState::Succeeded)
            .map(|t| (t.name.clone(), t.results.clone()))
            .collect()
    }

    /// Resolve declared pipeline results against realized task results.
    ///
    /// Results whose producer did not succeed are omitted.
    pub fn pipeline_results(&self) -> BTreeMap<String, String> {
        let view = self.task_results();
        let mut out = BTreeMap::new();
        for (name, expr) in &self.result_exprs {
            if let Ok(value) = crate::binding::substitute_results(expr, &view) {
                out.insert(name.clone(), value);
            }
        }
        out
    }

    fn settle_and_check(&mut self) -> PlanStep {
        let mut manager = StateManager::new(&mut self.tasks, self.run_id);
        let (newly_ready, newly_skipped) = manager.settle();

        let finished = if manager.all_tasks_terminal() {
            let status = manager.final_status(self.cancelled);
            info!(
                run_id = %self.run_id,
                status = ?status,
                "all tasks terminal; pipeline run finished"
            );
            Some(status)
        } else {
            None
        };

        if finished.is_some() {
            self.finished = finished;
        }

        PlanStep {
            newly_ready,
            newly_skipped,
            newly_cancelled: Vec::new(),
            finished,
        }
    }
}

/// Bind declared pipeline parameters with caller overrides.
fn bind_parameters(
    cfg: &ConfigFile,
    overrides: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    for name in overrides.keys() {
        if !cfg.pipeline.params.contains_key(name) {
            return Err(EngineError::Definition(format!(
                "override for undeclared parameter '{name}'"
            )));
        }
    }

    let mut bound = BTreeMap::new();
    for (name, decl) in cfg.pipeline.params.iter() {
        match overrides.get(name).cloned().or_else(|| decl.default.clone()) {
            Some(value) => {
                bound.insert(name.clone(), value);
            }
            None => {
                return Err(EngineError::Definition(format!(
                    "parameter '{name}' has no default and no bound value"
                )));
            }
        }
    }

    Ok(bound)
}
