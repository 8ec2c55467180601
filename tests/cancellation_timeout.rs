// tests/cancellation_timeout.rs

//! Timeout and cancellation semantics.

use std::sync::Arc;
use std::time::Duration;

use gantry::dag::{PipelineStatus, RunState};
use gantry::execute_pipeline;
use gantry::store::RunStore;
use gantry::types::StorageMode;
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use gantry_test_utils::deps::memory_deps;
use gantry_test_utils::fake_substrate::{FakeSubstrate, ScriptedOutcome};
use gantry_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn task_timeout_cancels_the_task_and_fails_the_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new("slow-task")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_task(
            "stall",
            TaskConfigBuilder::new("sleep forever").timeout("100ms").build(),
        )
        .with_task("after", TaskConfigBuilder::new("echo").after("stall").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script(
        "stall",
        ScriptedOutcome::default().with_delay(Duration::from_secs(30)),
    );
    let deps = memory_deps(substrate);
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Failed);

    let task_runs = store.task_runs_of(report.run_id)?;
    let stall = task_runs.iter().find(|t| t.task == "stall").unwrap();
    assert_eq!(stall.status, RunState::Cancelled);
    assert!(stall
        .failure
        .as_deref()
        .unwrap_or_default()
        .contains("timeout"));

    let after = task_runs.iter().find(|t| t.task == "after").unwrap();
    assert_eq!(after.status, RunState::Skipped);

    // Timed-out runs are not attested.
    assert!(store.attestation_for_run(stall.id)?.is_none());

    Ok(())
}

#[tokio::test]
async fn pipeline_timeout_cancels_running_and_pending_children() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // fast succeeds, slow is still running when the pipeline budget fires,
    // and queued never starts.
    let cfg = ConfigFileBuilder::new("slow-pipeline")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_pipeline_timeout("300ms")
        .with_task("fast", TaskConfigBuilder::new("quick").build())
        .with_task("slow", TaskConfigBuilder::new("stall").build())
        .with_task("queued", TaskConfigBuilder::new("later").after("slow").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script(
        "slow",
        ScriptedOutcome::default().with_delay(Duration::from_secs(30)),
    );
    let deps = memory_deps(substrate);
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Cancelled);

    let task_runs = store.task_runs_of(report.run_id)?;
    let status_of = |name: &str| {
        task_runs
            .iter()
            .find(|t| t.task == name)
            .map(|t| t.status)
            .expect("task recorded")
    };

    // Already-succeeded work is retained for audit; in-flight work is
    // cancelled; not-yet-started work never dispatches.
    assert_eq!(status_of("fast"), RunState::Succeeded);
    assert_eq!(status_of("slow"), RunState::Cancelled);
    assert_eq!(status_of("queued"), RunState::Cancelled);

    let fast = task_runs.iter().find(|t| t.task == "fast").unwrap();
    assert!(!fast.results.is_empty() || fast.status == RunState::Succeeded);
    assert!(store.attestation_for_run(fast.id)?.is_some());

    Ok(())
}
