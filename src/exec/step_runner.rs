// src/exec/step_runner.rs

//! Individual task runner: executes a task's steps in order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskCompletion, TaskOutcome};
use crate::exec::substrate::{ExecutionSubstrate, IsolationReport, StepRequest};
use crate::types::IsolationEnforcement;
use crate::workspace::TaskPaths;

/// Run a single task: every step in order, first failure aborts the rest.
///
/// Emits exactly one `TaskCompleted` event:
/// - `Succeeded` when all steps exited zero and every declared result was
///   produced (and isolation enforcement did not reject the run);
/// - `Failed` on step failure, missing results, or an unachieved isolation
///   request under `isolation_enforcement = "fail"`;
/// - `Cancelled` on cancellation or when the task's wall-clock budget runs
///   out. Dropping the in-flight substrate future kills the step process.
pub async fn run_task(
    task: ScheduledTask,
    paths: TaskPaths,
    substrate: Arc<dyn ExecutionSubstrate>,
    enforcement: IsolationEnforcement,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let task_name = task.name.clone();
    let started = Instant::now();

    let mut results: BTreeMap<String, String> = BTreeMap::new();
    let mut report = IsolationReport::default();
    let mut saw_report = false;

    let mut completion: Option<TaskCompletion> = None;

    for step in &task.steps {
        let remaining = match task.timeout {
            Some(budget) => match budget.checked_sub(started.elapsed()) {
                Some(r) => Some(r),
                None => {
                    completion = Some(cancelled_completion(
                        &task,
                        &report,
                        saw_report,
                        "task timeout exceeded",
                    ));
                    break;
                }
            },
            None => None,
        };

        let request = StepRequest {
            run_id: task.run_id,
            task: task.name.clone(),
            step: step.clone(),
            isolation: task.isolation,
            workspaces: paths.workspaces.clone(),
            results_dir: paths.results_dir.clone(),
            declared_results: task.declared_results.clone(),
            working_dir: paths.working_dir.clone(),
        };

        let exec = substrate.execute_step(request);

        let outcome = tokio::select! {
            res = maybe_timeout(remaining, exec) => match res {
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => {
                    error!(
                        task = %task.name,
                        run_id = %task.run_id,
                        step = %step.name,
                        error = %e,
                        "step execution error"
                    );
                    completion = Some(TaskCompletion {
                        outcome: TaskOutcome::Failed {
                            reason: format!("step '{}': {e}", step.name),
                        },
                        isolation: saw_report.then_some(report),
                        violations: violations_of(&task, &report),
                    });
                    break;
                }
                None => {
                    completion = Some(cancelled_completion(
                        &task,
                        &report,
                        saw_report,
                        "task timeout exceeded",
                    ));
                    break;
                }
            },
            cancel = &mut cancel_rx => {
                match cancel {
                    Ok(()) => info!(
                        task = %task.name,
                        run_id = %task.run_id,
                        step = %step.name,
                        "cancellation requested; stopping task"
                    ),
                    Err(e) => debug!(
                        task = %task.name,
                        error = %e,
                        "cancel channel closed; stopping task"
                    ),
                }
                completion = Some(cancelled_completion(
                    &task,
                    &report,
                    saw_report,
                    "cancelled",
                ));
                break;
            }
        };

        if saw_report {
            merge_report(&mut report, &outcome.isolation);
        } else {
            report = outcome.isolation;
            saw_report = true;
        }
        results.extend(outcome.results.clone());

        if !outcome.success() {
            warn!(
                task = %task.name,
                run_id = %task.run_id,
                step = %step.name,
                exit_code = outcome.exit_code,
                "step failed; aborting remaining steps"
            );
            completion = Some(TaskCompletion {
                outcome: TaskOutcome::Failed {
                    reason: format!(
                        "step '{}' failed with exit code {}",
                        step.name, outcome.exit_code
                    ),
                },
                isolation: Some(report),
                violations: violations_of(&task, &report),
            });
            break;
        }
    }

    let completion = completion.unwrap_or_else(|| {
        let violations = violations_of(&task, &report);

        if enforcement == IsolationEnforcement::Fail && !violations.is_empty() {
            return TaskCompletion {
                outcome: TaskOutcome::Failed {
                    reason: format!("isolation violation: {}", violations.join("; ")),
                },
                isolation: Some(report),
                violations,
            };
        }

        // Declared results must exist even when every step exited zero.
        let missing: Vec<&String> = task
            .declared_results
            .iter()
            .filter(|name| !results.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return TaskCompletion {
                outcome: TaskOutcome::Failed {
                    reason: format!("declared results never written: {names}"),
                },
                isolation: Some(report),
                violations,
            };
        }

        TaskCompletion {
            outcome: TaskOutcome::Succeeded { results },
            isolation: saw_report.then_some(report),
            violations,
        }
    });

    if runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            task: task_name.clone(),
            completion,
        })
        .await
        .is_err()
    {
        warn!(
            task = %task_name,
            "runtime event channel closed; dropping task completion"
        );
    }
}

/// Apply the task timeout to the step future when one is configured.
///
/// Returns `None` when the budget elapsed.
async fn maybe_timeout<F, T>(remaining: Option<std::time::Duration>, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match remaining {
        Some(budget) => tokio::time::timeout(budget, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn cancelled_completion(
    task: &ScheduledTask,
    report: &IsolationReport,
    saw_report: bool,
    reason: &str,
) -> TaskCompletion {
    TaskCompletion {
        outcome: TaskOutcome::Cancelled {
            reason: reason.to_string(),
        },
        isolation: saw_report.then_some(*report),
        violations: violations_of(task, report),
    }
}

/// Merge a step's isolation report into the task-level report.
///
/// A property achieved for the task means achieved for *every* step, so
/// `false` is sticky.
fn merge_report(acc: &mut IsolationReport, step: &IsolationReport) {
    acc.context_isolated = acc.context_isolated && step.context_isolated;

    for (slot, value) in [
        (&mut acc.network_isolated, step.network_isolated),
        (&mut acc.filesystem_read_only, step.filesystem_read_only),
        (&mut acc.deps_prestaged, step.deps_prestaged),
    ] {
        *slot = match (*slot, value) {
            (Some(a), Some(b)) => Some(a && b),
            (None, v) => v,
            (v, None) => v,
        };
    }
}

/// Requested-but-unachieved isolation properties, as violation messages.
fn violations_of(task: &ScheduledTask, report: &IsolationReport) -> Vec<String> {
    let mut violations = Vec::new();

    if task.isolation.network_disabled && report.network_isolated != Some(true) {
        violations.push("network isolation requested but not achieved".to_string());
    }
    if task.isolation.filesystem_read_only && report.filesystem_read_only != Some(true) {
        violations.push("read-only filesystem requested but not achieved".to_string());
    }
    if task.isolation.deps_prestaged && report.deps_prestaged != Some(true) {
        violations.push("pre-staged dependencies requested but not achieved".to_string());
    }

    violations
}
