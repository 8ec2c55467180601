// src/exec/substrate.rs

//! Pluggable execution substrate abstraction.
//!
//! The engine never runs build steps itself; it hands each step to an
//! `ExecutionSubstrate` together with the requested isolation properties and
//! verifies what the substrate reports back. This keeps the scheduler
//! testable (tests use a scripted fake) and keeps container runtimes behind
//! one seam.
//!
//! - [`LocalProcessSubstrate`] is the default implementation: it executes
//!   step commands as host processes via `tokio::process::Command`. It cannot
//!   grant network or filesystem isolation and reports so honestly, which is
//!   exactly what the isolation verification in the step runner consumes.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::model::IsolationSpec;
use crate::dag::ResolvedStep;
use crate::engine::TaskName;
use crate::errors::{EngineError, Result};

/// A single step handed to the substrate.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub run_id: Uuid,
    pub task: TaskName,
    pub step: ResolvedStep,
    /// Isolation properties the executor requests for this step.
    pub isolation: IsolationSpec,
    /// Logical workspace name to mounted path.
    pub workspaces: BTreeMap<String, PathBuf>,
    /// Directory the step writes declared result files into.
    pub results_dir: PathBuf,
    /// Result names the task declares; the substrate returns whichever files
    /// the step actually wrote.
    pub declared_results: Vec<String>,
    pub working_dir: PathBuf,
}

/// What the substrate achieved for a step.
///
/// `None` means the property was not requested. The step runner compares
/// this report against the request and records violations for any requested
/// property that was not achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationReport {
    /// Whether the step ran in its own isolated execution context (e.g. a
    /// container), as opposed to sharing the host environment.
    pub context_isolated: bool,
    pub network_isolated: Option<bool>,
    pub filesystem_read_only: Option<bool>,
    pub deps_prestaged: Option<bool>,
}

/// Result of executing one step.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub exit_code: i32,
    /// Declared result files the step wrote, name to trimmed content.
    pub results: BTreeMap<String, String>,
    pub isolation: IsolationReport,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait abstracting how steps are executed.
///
/// Production code uses [`LocalProcessSubstrate`] (or a container-backed
/// implementation); tests provide scripted fakes that never spawn processes.
pub trait ExecutionSubstrate: Send + Sync {
    /// Execute a single step to completion and report the outcome.
    ///
    /// Cancellation is performed by dropping the returned future; the
    /// implementation must kill any underlying process in that case.
    fn execute_step(
        &self,
        request: StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome>> + Send + '_>>;
}

/// Substrate that runs steps as host processes.
pub struct LocalProcessSubstrate;

impl LocalProcessSubstrate {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalProcessSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionSubstrate for LocalProcessSubstrate {
    fn execute_step(
        &self,
        request: StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome>> + Send + '_>> {
        Box::pin(async move { run_step_process(request).await })
    }
}

async fn run_step_process(request: StepRequest) -> Result<StepOutcome> {
    info!(
        task = %request.task,
        run_id = %request.run_id,
        step = %request.step.name,
        cmd = %request.step.command,
        "starting step process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&request.step.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&request.step.command);
        c
    };

    cmd.current_dir(&request.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.env("GANTRY_RESULTS_DIR", &request.results_dir);
    for (name, path) in &request.workspaces {
        cmd.env(
            format!("GANTRY_WORKSPACE_{}", name.to_uppercase().replace('-', "_")),
            path,
        );
    }
    for (k, v) in &request.step.env {
        cmd.env(k, v);
    }
    // Advisory only; host processes cannot be denied connectivity here.
    if request.isolation.network_disabled {
        cmd.env("GANTRY_NETWORK_DISABLED", "1");
    }

    let mut child = cmd.spawn().map_err(|e| {
        EngineError::Execution(format!(
            "spawning process for step '{}' of task '{}': {e}",
            request.step.name, request.task
        ))
    })?;

    // Consume both pipes so buffers don't fill; log at debug.
    if let Some(stdout) = child.stdout.take() {
        let task = request.task.clone();
        let step = request.step.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, step = %step, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let task = request.task.clone();
        let step = request.step.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, step = %step, "stderr: {}", line);
            }
        });
    }

    let status = child.wait().await.map_err(|e| {
        EngineError::Execution(format!(
            "waiting for step '{}' of task '{}': {e}",
            request.step.name, request.task
        ))
    })?;

    let exit_code = status.code().unwrap_or(-1);
    info!(
        task = %request.task,
        run_id = %request.run_id,
        step = %request.step.name,
        exit_code,
        success = status.success(),
        "step process exited"
    );

    let results = collect_result_files(&request)?;

    // A host process shares the host context: requested isolation properties
    // are reported unachieved rather than silently claimed.
    let isolation = IsolationReport {
        context_isolated: false,
        network_isolated: request.isolation.network_disabled.then_some(false),
        filesystem_read_only: request.isolation.filesystem_read_only.then_some(false),
        deps_prestaged: request.isolation.deps_prestaged.then_some(false),
    };

    Ok(StepOutcome {
        exit_code,
        results,
        isolation,
    })
}

/// Read whichever declared result files the step wrote.
fn collect_result_files(request: &StepRequest) -> Result<BTreeMap<String, String>> {
    let mut results = BTreeMap::new();

    for name in &request.declared_results {
        let path = request.results_dir.join(name);
        if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            results.insert(name.clone(), raw.trim_end_matches('\n').to_string());
        }
    }

    Ok(results)
}
