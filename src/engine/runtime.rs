// src/engine/runtime.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attest::{
    ArtifactRegistry, AttestationGenerator, Invocation, Material, Subject,
};
use crate::compliance::{ComplianceEvaluator, ComplianceReport};
use crate::dag::{PipelineStatus, RunState, ScheduledTask, SkippedTask};
use crate::engine::core::CoreRuntime;
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::{RuntimeEvent, TaskCompletion, TaskName, TaskOutcome};
use crate::errors::Result;
use crate::exec::step_runner;
use crate::exec::substrate::ExecutionSubstrate;
use crate::sign::Signer;
use crate::store::{
    AttestationRecord, PipelineRunRecord, RunStore, RunWarning, SignatureRecord, TaskRunRecord,
    WarningKind,
};
use crate::transparency::TransparencyWitness;
use crate::types::IsolationEnforcement;
use crate::verify::VerificationStatus;
use crate::workspace::RunWorkspace;

/// Provenance-side collaborators the runtime drives after completions.
pub struct ProvenanceServices {
    pub store: Arc<dyn RunStore>,
    pub generator: AttestationGenerator,
    pub signer: Arc<Signer>,
    /// Present when `[signing].transparency = true`.
    pub transparency: Option<Arc<dyn TransparencyWitness>>,
    pub registry: Arc<dyn ArtifactRegistry>,
    /// Materials resolved once at run creation.
    pub materials: Vec<Material>,
}

/// Final report of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub status: PipelineStatus,
    pub results: BTreeMap<String, String>,
    pub compliance: ComplianceReport,
}

/// Internal handle for a currently-running task.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Drives the execution plan in response to `RuntimeEvent`s and performs all
/// IO around the pure core: dispatching tasks to the substrate, record
/// keeping, timeouts, cancellation, attestation, signing and transparency
/// recording.
pub struct Runtime {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    substrate: Arc<dyn ExecutionSubstrate>,
    workspace: RunWorkspace,
    enforcement: IsolationEnforcement,
    pipeline_timeout: Option<Duration>,
    services: ProvenanceServices,
    pipeline_verification: VerificationStatus,
    task_verification: BTreeMap<TaskName, VerificationStatus>,
    active: HashMap<TaskName, ActiveTask>,
    /// Task name to task run record id, for tasks that have a record.
    record_ids: HashMap<TaskName, Uuid>,
    run_warnings: Vec<RunWarning>,
    final_status: Option<PipelineStatus>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        substrate: Arc<dyn ExecutionSubstrate>,
        workspace: RunWorkspace,
        enforcement: IsolationEnforcement,
        pipeline_timeout: Option<Duration>,
        services: ProvenanceServices,
        pipeline_verification: VerificationStatus,
        task_verification: BTreeMap<TaskName, VerificationStatus>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            substrate,
            workspace,
            enforcement,
            pipeline_timeout,
            services,
            pipeline_verification,
            task_verification,
            active: HashMap::new(),
            record_ids: HashMap::new(),
            run_warnings: Vec::new(),
            final_status: None,
        }
    }

    /// Attach warnings gathered before the runtime started (e.g. material
    /// resolution failures).
    pub fn push_warnings(&mut self, warnings: Vec<RunWarning>) {
        self.run_warnings.extend(warnings);
    }

    /// Main event loop.
    ///
    /// - Persists the pipeline run record.
    /// - Feeds events into the pure core and executes the returned commands.
    /// - On completion events, finalizes the task record and runs the
    ///   attestation / signing / transparency chain (all non-fatal).
    /// - Returns the final run report once the core declares the run done.
    pub async fn run(mut self) -> Result<RunReport> {
        let run_id = self.core.plan().run_id();
        info!(run_id = %run_id, pipeline = %self.core.plan().pipeline_name(), "runtime started");

        self.persist_pipeline_record(PipelineStatus::Running)?;

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        self.execute_step(step).await?;

        let timeout_fut = sleep_or_forever(self.pipeline_timeout);
        tokio::pin!(timeout_fut);
        let mut timed_out = false;

        while keep_running {
            let event = tokio::select! {
                ev = self.event_rx.recv() => match ev {
                    Some(e) => e,
                    None => {
                        warn!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = &mut timeout_fut, if !timed_out => {
                    timed_out = true;
                    warn!(run_id = %run_id, "pipeline timeout fired; cancelling run");
                    RuntimeEvent::PipelineTimedOut
                }
            };

            debug!(?event, "runtime received event");

            if let RuntimeEvent::TaskCompleted { task, completion } = &event {
                self.finalize_task_record(task, completion).await?;
            }

            let step = self.core.step(event);
            keep_running = step.keep_running;
            self.execute_step(step).await?;
        }

        self.finalize_run().await
    }

    /// Execute the commands (and record the skips/cancellations) of one
    /// core step.
    async fn execute_step(&mut self, step: CoreStep) -> Result<()> {
        for skipped in &step.skipped {
            self.record_skipped_task(skipped)?;
        }
        for name in &step.cancelled {
            self.record_cancelled_task(name)?;
        }

        for command in step.commands {
            match command {
                CoreCommand::DispatchTasks(tasks) => {
                    for task in tasks {
                        self.dispatch_task(task)?;
                    }
                }
                CoreCommand::CancelRunning(names) => {
                    for name in names {
                        self.cancel_active_task(&name);
                    }
                }
                CoreCommand::FinishRun(status) => {
                    self.final_status = Some(status);
                }
            }
        }

        Ok(())
    }

    /// Create the task run record and hand the task to the step runner.
    fn dispatch_task(&mut self, task: ScheduledTask) -> Result<()> {
        let record_id = Uuid::new_v4();
        let record = TaskRunRecord {
            id: record_id,
            pipeline_run: task.run_id,
            pipeline: self.core.plan().pipeline_name().to_string(),
            task: task.name.clone(),
            status: RunState::Running,
            started_at: Some(Utc::now()),
            finished_at: None,
            results: BTreeMap::new(),
            skip_reason: None,
            failure: None,
            isolation_requested: task.isolation,
            isolation_report: None,
            violations: Vec::new(),
            verification: self.verification_of(&task.name),
            warnings: Vec::new(),
        };
        self.services.store.put_task_run(&record)?;
        self.record_ids.insert(task.name.clone(), record_id);

        let paths = self.workspace.task_paths(&task)?;
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let name = task.name.clone();

        debug!(task = %name, run_id = %task.run_id, "dispatching task");

        let handle = tokio::spawn(step_runner::run_task(
            task,
            paths,
            Arc::clone(&self.substrate),
            self.enforcement,
            self.event_tx.clone(),
            cancel_rx,
        ));

        self.active.insert(
            name,
            ActiveTask {
                cancel: Some(cancel_tx),
                handle,
            },
        );

        Ok(())
    }

    fn cancel_active_task(&mut self, name: &str) {
        match self.active.get_mut(name) {
            Some(active) => {
                if active.handle.is_finished() {
                    debug!(task = %name, "task already finished while cancelling");
                    return;
                }
                if let Some(cancel) = active.cancel.take() {
                    info!(task = %name, "requesting task cancellation");
                    if cancel.send(()).is_err() {
                        debug!(task = %name, "task finished before cancellation arrived");
                    }
                }
            }
            None => {
                debug!(task = %name, "cancel requested for task with no active handle");
            }
        }
    }

    fn record_skipped_task(&mut self, skipped: &SkippedTask) -> Result<()> {
        let record_id = Uuid::new_v4();
        let record = TaskRunRecord {
            id: record_id,
            pipeline_run: self.core.plan().run_id(),
            pipeline: self.core.plan().pipeline_name().to_string(),
            task: skipped.name.clone(),
            status: RunState::Skipped,
            started_at: None,
            finished_at: Some(Utc::now()),
            results: BTreeMap::new(),
            skip_reason: Some(skipped.reason.clone()),
            failure: None,
            isolation_requested: self
                .core
                .plan()
                .isolation_of(&skipped.name)
                .unwrap_or_default(),
            isolation_report: None,
            violations: Vec::new(),
            verification: self.verification_of(&skipped.name),
            warnings: Vec::new(),
        };
        self.services.store.put_task_run(&record)?;
        self.record_ids.insert(skipped.name.clone(), record_id);
        Ok(())
    }

    /// Record a task that was cancelled before it ever dispatched.
    fn record_cancelled_task(&mut self, name: &str) -> Result<()> {
        // Gate-drained tasks were marked Running and may already carry a
        // record from a dispatch that never happened; either way the record
        // here is authoritative.
        let record_id = self
            .record_ids
            .get(name)
            .copied()
            .unwrap_or_else(Uuid::new_v4);
        let record = TaskRunRecord {
            id: record_id,
            pipeline_run: self.core.plan().run_id(),
            pipeline: self.core.plan().pipeline_name().to_string(),
            task: name.to_string(),
            status: RunState::Cancelled,
            started_at: None,
            finished_at: Some(Utc::now()),
            results: BTreeMap::new(),
            skip_reason: None,
            failure: Some("cancelled before start".to_string()),
            isolation_requested: self.core.plan().isolation_of(name).unwrap_or_default(),
            isolation_report: None,
            violations: Vec::new(),
            verification: self.verification_of(name),
            warnings: Vec::new(),
        };
        self.services.store.put_task_run(&record)?;
        self.record_ids.insert(name.to_string(), record_id);
        Ok(())
    }

    /// Update the task record with its completion, then (for successes) run
    /// the attestation chain. Attestation/signing/transparency failures are
    /// recorded as warnings, never propagated.
    async fn finalize_task_record(
        &mut self,
        task: &str,
        completion: &TaskCompletion,
    ) -> Result<()> {
        self.active.remove(task);

        let Some(record_id) = self.record_ids.get(task).copied() else {
            warn!(task = %task, "completion for task without a record");
            return Ok(());
        };
        let Some(mut record) = self.services.store.get_task_run(record_id)? else {
            warn!(task = %task, "task record disappeared from store");
            return Ok(());
        };

        record.finished_at = Some(Utc::now());
        record.isolation_report = completion.isolation;
        record.violations = completion.violations.clone();
        for violation in &completion.violations {
            record.warnings.push(RunWarning {
                kind: WarningKind::Isolation,
                message: violation.clone(),
            });
        }

        match &completion.outcome {
            TaskOutcome::Succeeded { results } => {
                record.status = RunState::Succeeded;
                record.results = results.clone();
            }
            TaskOutcome::Failed { reason } => {
                record.status = RunState::Failed;
                record.failure = Some(reason.clone());
            }
            TaskOutcome::Cancelled { reason } => {
                record.status = RunState::Cancelled;
                record.failure = Some(reason.clone());
            }
        }

        if record.status == RunState::Succeeded {
            let warnings = self.attest_and_sign(&mut record).await;
            record.warnings.extend(warnings);
        }

        self.services.store.put_task_run(&record)?;
        Ok(())
    }

    /// Attestation → signature → transparency chain for one succeeded task.
    ///
    /// Each stage failing is surfaced as a distinct structured warning so
    /// compliance evaluation can tell "unattested" from "attested but
    /// unsigned" from "signed but unrecorded".
    async fn attest_and_sign(&self, record: &mut TaskRunRecord) -> Vec<RunWarning> {
        let mut warnings = Vec::new();

        let invocation = Invocation {
            pipeline: self.core.plan().pipeline_name().to_string(),
            pipeline_version: self.core.plan().pipeline_version().to_string(),
            task: Some(record.task.clone()),
            parameters: self.core.plan().params().clone(),
        };

        let attestation = match self.build_attestation(
            invocation,
            &record.task,
            &record.results,
            record.started_at.unwrap_or_else(Utc::now),
            record.finished_at.unwrap_or_else(Utc::now),
            record.id,
            record.pipeline_run,
        ) {
            Ok(att) => att,
            Err(e) => {
                warn!(task = %record.task, error = %e, "attestation generation failed");
                warnings.push(RunWarning {
                    kind: WarningKind::Attestation,
                    message: format!("attestation not generated: {e}"),
                });
                return warnings;
            }
        };

        warnings.extend(self.sign_and_record(&attestation).await);
        warnings
    }

    /// Build and persist the attestation record for one run.
    #[allow(clippy::too_many_arguments)]
    fn build_attestation(
        &self,
        invocation: Invocation,
        subject_name: &str,
        byproducts: &BTreeMap<String, String>,
        started_at: chrono::DateTime<Utc>,
        finished_at: chrono::DateTime<Utc>,
        run_id: Uuid,
        pipeline_run: Uuid,
    ) -> Result<AttestationRecord> {
        // The subject is the content digest of the run's result manifest, as
        // registered with the artifact registry.
        let manifest = serde_json::to_vec(byproducts)?;
        let digest = self.services.registry.register(subject_name, &manifest)?;

        let document = self.services.generator.generate(
            invocation,
            vec![Subject {
                name: subject_name.to_string(),
                digest: digest.clone(),
            }],
            self.services.materials.clone(),
            byproducts.clone(),
            started_at,
            finished_at,
        );

        let record = AttestationRecord {
            id: Uuid::new_v4(),
            run_id,
            pipeline_run,
            subject_digest: digest,
            document,
            created_at: Utc::now(),
        };
        self.services.store.put_attestation(&record)?;

        info!(
            subject = %subject_name,
            attestation = %record.id,
            "generated attestation"
        );

        Ok(record)
    }

    /// Sign a persisted attestation and optionally record the signature in
    /// the transparency log.
    async fn sign_and_record(&self, attestation: &AttestationRecord) -> Vec<RunWarning> {
        let mut warnings = Vec::new();

        let payload = match attestation.document.canonical_bytes() {
            Ok(p) => p,
            Err(e) => {
                warnings.push(RunWarning {
                    kind: WarningKind::Attestation,
                    message: format!("attestation not serializable: {e}"),
                });
                return warnings;
            }
        };

        let signature = match self.services.signer.sign(&payload).await {
            Ok(Some(sig)) => sig,
            Ok(None) => return warnings,
            Err(e) => {
                warnings.push(RunWarning {
                    kind: WarningKind::Signing,
                    message: e.to_string(),
                });
                return warnings;
            }
        };

        let mut record = SignatureRecord {
            id: Uuid::new_v4(),
            attestation: attestation.id,
            pipeline_run: attestation.pipeline_run,
            signature,
            inclusion_proof: None,
        };

        if let Some(log) = &self.services.transparency {
            match log.record(&record.signature.payload_hash, &record.signature.signature) {
                Ok(proof) => record.inclusion_proof = Some(proof),
                Err(e) => {
                    // Independent of signing failure: the run stays signed
                    // but unrecorded.
                    warnings.push(RunWarning {
                        kind: WarningKind::Transparency,
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.services.store.put_signature(&record) {
            warnings.push(RunWarning {
                kind: WarningKind::Signing,
                message: format!("signature not persisted: {e}"),
            });
        }

        warnings
    }

    /// Finalize the pipeline record, attest the run as a whole, and evaluate
    /// compliance.
    async fn finalize_run(mut self) -> Result<RunReport> {
        let run_id = self.core.plan().run_id();
        let status = self
            .final_status
            .or_else(|| self.core.plan().status())
            .unwrap_or(PipelineStatus::Failed);
        let results = self.core.plan().pipeline_results();

        if status == PipelineStatus::Succeeded {
            let invocation = Invocation {
                pipeline: self.core.plan().pipeline_name().to_string(),
                pipeline_version: self.core.plan().pipeline_version().to_string(),
                task: None,
                parameters: self.core.plan().params().clone(),
            };

            let started_at = self
                .services
                .store
                .get_pipeline_run(run_id)?
                .map(|r| r.started_at)
                .unwrap_or_else(Utc::now);

            match self.build_attestation(
                invocation,
                self.core.plan().pipeline_name(),
                &results,
                started_at,
                Utc::now(),
                run_id,
                run_id,
            ) {
                Ok(attestation) => {
                    let warnings = self.sign_and_record(&attestation).await;
                    self.run_warnings.extend(warnings);
                }
                Err(e) => {
                    self.run_warnings.push(RunWarning {
                        kind: WarningKind::Attestation,
                        message: format!("attestation not generated: {e}"),
                    });
                }
            }
        }

        self.persist_pipeline_record(status)?;

        let evaluator = ComplianceEvaluator::new(self.services.store.as_ref());
        let compliance = evaluator.evaluate(run_id)?;

        info!(
            run_id = %run_id,
            status = ?status,
            level = compliance.level,
            "pipeline run finished: {}",
            compliance.describe()
        );

        Ok(RunReport {
            run_id,
            pipeline: self.core.plan().pipeline_name().to_string(),
            status,
            results,
            compliance,
        })
    }

    fn persist_pipeline_record(&self, status: PipelineStatus) -> Result<()> {
        let plan = self.core.plan();
        let run_id = plan.run_id();

        let existing = self.services.store.get_pipeline_run(run_id)?;
        let started_at = existing
            .as_ref()
            .map(|r| r.started_at)
            .unwrap_or_else(Utc::now);
        let labels = existing
            .as_ref()
            .map(|r| r.labels.clone())
            .unwrap_or_default();

        let finished = !matches!(status, PipelineStatus::Running | PipelineStatus::Pending);
        let record = PipelineRunRecord {
            id: run_id,
            pipeline: plan.pipeline_name().to_string(),
            pipeline_version: plan.pipeline_version().to_string(),
            status,
            params: plan.params().clone(),
            labels,
            started_at,
            finished_at: finished.then(Utc::now),
            results: plan.pipeline_results(),
            verification: self.pipeline_verification.clone(),
            warnings: self.run_warnings.clone(),
        };
        self.services.store.put_pipeline_run(&record)
    }

    fn verification_of(&self, task: &str) -> VerificationStatus {
        self.task_verification
            .get(task)
            .cloned()
            .unwrap_or(VerificationStatus::Skipped)
    }
}

/// Sleep for the pipeline timeout, or forever when none is configured.
async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}
