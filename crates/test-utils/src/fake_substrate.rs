use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gantry::errors::Result;
use gantry::exec::{ExecutionSubstrate, IsolationReport, StepOutcome, StepRequest};

/// Scripted behaviour for one task on the fake substrate.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOutcome {
    pub exit_code: i32,
    /// Results to report; when empty, every declared result is produced
    /// with a `<task>-<result>` placeholder value.
    pub results: BTreeMap<String, String>,
    /// Isolation report override; when absent the fake claims a fully
    /// capable substrate (isolated context, all requested properties
    /// achieved).
    pub isolation: Option<IsolationReport>,
    /// Simulated execution time, for cancellation and timeout tests.
    pub delay: Option<Duration>,
}

impl ScriptedOutcome {
    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_result(mut self, name: &str, value: &str) -> Self {
        self.results.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_isolation(mut self, report: IsolationReport) -> Self {
        self.isolation = Some(report);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A fake substrate that:
/// - records every step it was asked to execute (in order)
/// - immediately reports a scripted (default: successful) outcome.
///
/// By default it behaves like a fully capable isolated substrate, so
/// isolation-requesting tasks pass verification; tests script degraded
/// reports to exercise the violation paths.
#[derive(Default)]
pub struct FakeSubstrate {
    outcomes: Mutex<HashMap<String, ScriptedOutcome>>,
    executed: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<StepRequest>>>,
}

impl FakeSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for every step of the named task.
    pub fn script(&self, task: &str, outcome: ScriptedOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(task.to_string(), outcome);
    }

    /// `"task/step"` identifiers in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Task names in execution order, deduplicated per step.
    pub fn executed_tasks(&self) -> Vec<String> {
        let mut tasks = Vec::new();
        for id in self.executed() {
            let task = id.split('/').next().unwrap_or(&id).to_string();
            if tasks.last() != Some(&task) {
                tasks.push(task);
            }
        }
        tasks
    }

    /// Every request received, for command/env assertions.
    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn outcome_for(&self, request: &StepRequest) -> StepOutcome {
        let scripted = self
            .outcomes
            .lock()
            .unwrap()
            .get(&request.task)
            .cloned()
            .unwrap_or_default();

        let results = if scripted.results.is_empty() {
            request
                .declared_results
                .iter()
                .map(|r| (r.clone(), format!("{}-{r}", request.task)))
                .collect()
        } else {
            scripted.results.clone()
        };

        let isolation = scripted.isolation.unwrap_or(IsolationReport {
            context_isolated: true,
            network_isolated: request.isolation.network_disabled.then_some(true),
            filesystem_read_only: request.isolation.filesystem_read_only.then_some(true),
            deps_prestaged: request.isolation.deps_prestaged.then_some(true),
        });

        StepOutcome {
            exit_code: scripted.exit_code,
            results,
            isolation,
        }
    }
}

impl ExecutionSubstrate for FakeSubstrate {
    fn execute_step(
        &self,
        request: StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome>> + Send + '_>> {
        let delay = self
            .outcomes
            .lock()
            .unwrap()
            .get(&request.task)
            .and_then(|o| o.delay);

        let outcome = self.outcome_for(&request);
        let executed = Arc::clone(&self.executed);
        let requests = Arc::clone(&self.requests);

        Box::pin(async move {
            executed
                .lock()
                .unwrap()
                .push(format!("{}/{}", request.task, request.step.name));
            requests.lock().unwrap().push(request);

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            Ok(outcome)
        })
    }
}
