// tests/pipeline_execution.rs

//! End-to-end scheduling through the runtime with a fake substrate.

use std::sync::Arc;

use gantry::config::ConfigFile;
use gantry::dag::{PipelineStatus, RunState};
use gantry::execute_pipeline;
use gantry::store::{RunStore, Selector};
use gantry::types::StorageMode;
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use gantry_test_utils::deps::memory_deps;
use gantry_test_utils::fake_substrate::{FakeSubstrate, ScriptedOutcome};
use gantry_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// clone -> build -> publish, wired through result references.
fn chain_config(storage_dir: &str) -> ConfigFile {
    ConfigFileBuilder::new("release")
        .with_storage(StorageMode::Memory, storage_dir)
        .with_param("tag", "v1")
        .with_task(
            "clone",
            TaskConfigBuilder::new("git clone").result("commit").build(),
        )
        .with_task(
            "build",
            TaskConfigBuilder::new("make build $(tasks.clone.results.commit)")
                .result("digest")
                .build(),
        )
        .with_task(
            "publish",
            TaskConfigBuilder::new("push $(tasks.build.results.digest) tag=$(params.tag)")
                .build(),
        )
        .with_pipeline_result("digest", "$(tasks.build.results.digest)")
        .with_label("team", "platform")
        .build()
}

#[tokio::test]
async fn runs_chain_in_dependency_order() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = chain_config(dir.path().to_str().unwrap());

    let substrate = Arc::new(FakeSubstrate::new());
    substrate.script(
        "build",
        ScriptedOutcome::default().with_result("digest", "sha256:abc123"),
    );
    let deps = memory_deps(substrate.clone());
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(
        substrate.executed_tasks(),
        vec!["clone".to_string(), "build".to_string(), "publish".to_string()]
    );

    // Result values flow into dependent commands only after the producer
    // succeeded.
    let publish_request = substrate
        .requests()
        .into_iter()
        .find(|r| r.task == "publish")
        .expect("publish executed");
    assert_eq!(publish_request.step.command, "push sha256:abc123 tag=v1");

    // Declared pipeline results are resolved from task results.
    assert_eq!(report.results.get("digest").map(String::as_str), Some("sha256:abc123"));

    // Run records are persisted and queryable by selector.
    let runs = store.list_pipeline_runs(&Selector::pipeline("release"))?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, PipelineStatus::Succeeded);

    let labelled = store.list_pipeline_runs(&Selector::pipeline("release").label("team", "platform"))?;
    assert_eq!(labelled.len(), 1);
    let other_label =
        store.list_pipeline_runs(&Selector::pipeline("release").label("team", "other"))?;
    assert!(other_label.is_empty());

    let task_runs = store.task_runs_of(report.run_id)?;
    assert_eq!(task_runs.len(), 3);
    assert!(task_runs.iter().all(|t| t.status == RunState::Succeeded));

    Ok(())
}

#[tokio::test]
async fn attests_every_succeeded_run_exactly_once() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = chain_config(dir.path().to_str().unwrap());

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate);
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
    assert_eq!(report.status, PipelineStatus::Succeeded);

    // One attestation per succeeded task run and one for the pipeline run.
    for task_run in store.task_runs_of(report.run_id)? {
        let att = store.attestation_for_run(task_run.id)?;
        let att = att.expect("succeeded task has an attestation");
        assert_eq!(att.document.invocation.task.as_deref(), Some(task_run.task.as_str()));
        assert!(att.subject_digest.starts_with("sha256:"));
    }
    let pipeline_att = store
        .attestation_for_run(report.run_id)?
        .expect("pipeline run has an attestation");
    assert_eq!(pipeline_att.document.invocation.task, None);

    // Unsigned provenance caps compliance at level 1 and says so.
    assert_eq!(report.compliance.level, 1);
    assert!(report
        .compliance
        .gaps
        .iter()
        .any(|g| g.evidence.contains("unsigned")));

    Ok(())
}

#[tokio::test]
async fn attestation_is_reproducible_for_identical_inputs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = chain_config(dir.path().to_str().unwrap());

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate);
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    let att = store
        .attestation_for_run(report.run_id)?
        .expect("pipeline attestation");

    // Same document, same bytes: serialization is canonical.
    let first = att.document.canonical_bytes()?;
    let second = att.document.canonical_bytes()?;
    assert_eq!(first, second);

    let reparsed: gantry::attest::Attestation = serde_json::from_slice(&first)?;
    assert_eq!(reparsed.canonical_bytes()?, first);

    Ok(())
}

#[tokio::test]
async fn concurrency_limit_bounds_parallel_dispatch() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // Three independent tasks, limit 1: they must run one after another.
    let cfg = ConfigFileBuilder::new("fanout")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_max_parallel(1)
        .with_task("a", TaskConfigBuilder::new("echo a").build())
        .with_task("b", TaskConfigBuilder::new("echo b").build())
        .with_task("c", TaskConfigBuilder::new("echo c").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(substrate.executed().len(), 3);

    Ok(())
}
