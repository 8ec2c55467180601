// tests/when_gates.rs

//! `when` gate semantics: gate-skipped tasks are terminal, non-erroring, and
//! transparent to ordering dependents.

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
async fn unsatisfied_gate_skips_task_without_failing_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new("gated")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_param("deploy", "false")
        .with_task("build", TaskConfigBuilder::new("make").build())
        .with_task(
            "deploy",
            TaskConfigBuilder::new("deploy")
                .after("build")
                .when_in("$(params.deploy)", &["true"])
                .build(),
        )
        .with_task(
            "notify",
            TaskConfigBuilder::new("notify").after("deploy").build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // A gate-skip is legitimate: the run still succeeds, and ordering
    // dependents of the skipped task still execute.
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(
        substrate.executed_tasks(),
        vec!["build".to_string(), "notify".to_string()]
    );

    let task_runs = store.task_runs_of(report.run_id)?;
    let deploy = task_runs.iter().find(|t| t.task == "deploy").unwrap();
    assert_eq!(deploy.status, RunState::Skipped);
    assert!(deploy
        .skip_reason
        .as_deref()
        .unwrap_or_default()
        .contains("when gate"));

    Ok(())
}

#[tokio::test]
async fn satisfied_gate_runs_task() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new("gated")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_param("deploy", "true")
        .with_task("build", TaskConfigBuilder::new("make").build())
        .with_task(
            "deploy",
            TaskConfigBuilder::new("deploy")
                .after("build")
                .when_in("$(params.deploy)", &["true"])
                .build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(
        substrate.executed_tasks(),
        vec!["build".to_string(), "deploy".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn gate_compares_produced_results() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // The gate input is another task's result; notin inverts the match.
    let cfg = ConfigFileBuilder::new("result-gated")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_task(
            "detect",
            TaskConfigBuilder::new("detect").result("channel").build(),
        )
        .with_task(
            "release",
            TaskConfigBuilder::new("release")
                .when_not_in("$(tasks.detect.results.channel)", &["dev"])
                .build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script(
        "detect",
        ScriptedOutcome::default().with_result("channel", "dev"),
    );
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(substrate.executed_tasks(), vec!["detect".to_string()]);

    let task_runs = store.task_runs_of(report.run_id)?;
    let release = task_runs.iter().find(|t| t.task == "release").unwrap();
    assert_eq!(release.status, RunState::Skipped);

    Ok(())
}

#[tokio::test]
async fn result_consumer_of_gate_skipped_task_is_skipped() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new("gated-results")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_param("enabled", "no")
        .with_task(
            "stage",
            TaskConfigBuilder::new("stage")
                .result("url")
                .when_in("$(params.enabled)", &["yes"])
                .build(),
        )
        .with_task(
            "smoke",
            TaskConfigBuilder::new("curl $(tasks.stage.results.url)").build(),
        )
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // No result can flow from a skipped producer, so the consumer skips too;
    // the run as a whole still counts as succeeded.
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert!(substrate.executed_tasks().is_empty());

    let task_runs = store.task_runs_of(report.run_id)?;
    for t in &task_runs {
        assert_eq!(t.status, RunState::Skipped, "task {} not skipped", t.task);
    }

    Ok(())
}
