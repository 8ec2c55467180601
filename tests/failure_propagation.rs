// tests/failure_propagation.rs

//! Failure semantics: failed tasks skip their dependents, not the world.

use std::sync::Arc;

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
async fn failed_task_skips_transitive_dependents() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // a -> b (result) -> c (result): a fails, b and c end Skipped.
    let cfg = ConfigFileBuilder::new("chain")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_task("a", TaskConfigBuilder::new("step a").result("out").build())
        .with_task(
            "b",
            TaskConfigBuilder::new("step b $(tasks.a.results.out)")
                .result("out")
                .build(),
        )
        .with_task(
            "c",
            TaskConfigBuilder::new("step c $(tasks.b.results.out)").build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script("a", ScriptedOutcome::failure(1));
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Failed);
    assert_eq!(substrate.executed_tasks(), vec!["a".to_string()]);

    let task_runs = store.task_runs_of(report.run_id)?;
    let status_of = |name: &str| {
        task_runs
            .iter()
            .find(|t| t.task == name)
            .map(|t| t.status)
            .expect("task recorded")
    };
    assert_eq!(status_of("a"), RunState::Failed);
    assert_eq!(status_of("b"), RunState::Skipped);
    assert_eq!(status_of("c"), RunState::Skipped);

    // No attestation exists for the failed task, the skipped tasks, or the
    // failed pipeline run.
    for t in &task_runs {
        assert!(store.attestation_for_run(t.id)?.is_none());
    }
    assert!(store.attestation_for_run(report.run_id)?.is_none());

    // Level 0, with the failure named as evidence.
    assert_eq!(report.compliance.level, 0);
    assert!(report
        .compliance
        .gaps
        .iter()
        .any(|g| g.evidence.contains("did not succeed")));

    Ok(())
}

#[tokio::test]
async fn continue_on_failure_lets_ordering_dependents_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // lint fails but is marked continue_on_failure; build (after lint) still
    // runs and the pipeline succeeds.
    let cfg = ConfigFileBuilder::new("lenient")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_task(
            "lint",
            TaskConfigBuilder::new("run lint")
                .continue_on_failure(true)
                .build(),
        )
        .with_task("build", TaskConfigBuilder::new("make").after("lint").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script("lint", ScriptedOutcome::failure(2));
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(
        substrate.executed_tasks(),
        vec!["lint".to_string(), "build".to_string()]
    );

    let task_runs = store.task_runs_of(report.run_id)?;
    let lint = task_runs.iter().find(|t| t.task == "lint").unwrap();
    assert_eq!(lint.status, RunState::Failed);

    Ok(())
}

#[tokio::test]
async fn continue_on_failure_never_exposes_results_of_failed_task() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // consumer reads scan's result, so even with continue_on_failure the
    // consumer must be skipped when scan fails.
    let cfg = ConfigFileBuilder::new("strict-results")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_task(
            "scan",
            TaskConfigBuilder::new("scan")
                .result("report")
                .continue_on_failure(true)
                .build(),
        )
        .with_task(
            "upload",
            TaskConfigBuilder::new("upload $(tasks.scan.results.report)").build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script("scan", ScriptedOutcome::failure(1));
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // The failed task is tolerated, but its consumer is skipped.
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(substrate.executed_tasks(), vec!["scan".to_string()]);

    let task_runs = store.task_runs_of(report.run_id)?;
    let upload = task_runs.iter().find(|t| t.task == "upload").unwrap();
    assert_eq!(upload.status, RunState::Skipped);
    assert!(upload
        .skip_reason
        .as_deref()
        .unwrap_or_default()
        .contains("unavailable"));

    Ok(())
}
