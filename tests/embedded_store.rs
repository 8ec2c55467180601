// tests/embedded_store.rs

//! Embedded store: records survive process boundaries and answer the audit
//! query surface.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use uuid::Uuid;

use gantry::dag::{PipelineStatus, RunState};
use gantry::store::{
    EmbeddedStore, PipelineRunRecord, RunStore, Selector, TaskRunRecord,
};
use gantry::verify::VerificationStatus;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn pipeline_run(pipeline: &str, hours_ago: i64) -> PipelineRunRecord {
    PipelineRunRecord {
        id: Uuid::new_v4(),
        pipeline: pipeline.to_string(),
        pipeline_version: "1".to_string(),
        status: PipelineStatus::Succeeded,
        params: BTreeMap::new(),
        labels: BTreeMap::from([("env".to_string(), "ci".to_string())]),
        started_at: Utc::now() - Duration::hours(hours_ago),
        finished_at: Some(Utc::now()),
        results: BTreeMap::new(),
        verification: VerificationStatus::Skipped,
        warnings: Vec::new(),
    }
}

fn task_run(run: &PipelineRunRecord, task: &str) -> TaskRunRecord {
    TaskRunRecord {
        id: Uuid::new_v4(),
        pipeline_run: run.id,
        pipeline: run.pipeline.clone(),
        task: task.to_string(),
        status: RunState::Succeeded,
        started_at: Some(run.started_at),
        finished_at: Some(Utc::now()),
        results: BTreeMap::new(),
        skip_reason: None,
        failure: None,
        isolation_requested: Default::default(),
        isolation_report: None,
        violations: Vec::new(),
        verification: VerificationStatus::Skipped,
        warnings: Vec::new(),
    }
}

#[test]
fn records_round_trip_across_store_instances() -> TestResult {
    let dir = tempfile::tempdir()?;

    let run = pipeline_run("release", 1);
    let task = task_run(&run, "build");

    {
        let store = EmbeddedStore::open(dir.path())?;
        store.put_pipeline_run(&run)?;
        store.put_task_run(&task)?;
    }

    // A fresh instance over the same root sees everything.
    let store = EmbeddedStore::open(dir.path())?;

    let loaded = store.get_pipeline_run(run.id)?.expect("run persisted");
    assert_eq!(loaded.pipeline, "release");
    assert_eq!(loaded.status, PipelineStatus::Succeeded);

    let tasks = store.task_runs_of(run.id)?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task, "build");

    Ok(())
}

#[test]
fn selector_filters_by_pipeline_time_and_label() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = EmbeddedStore::open(dir.path())?;

    let old = pipeline_run("release", 48);
    let recent = pipeline_run("release", 1);
    let other = pipeline_run("nightly", 1);
    for run in [&old, &recent, &other] {
        store.put_pipeline_run(run)?;
    }

    // All runs belonging to pipeline "release" since 24h ago.
    let selector = Selector::pipeline("release").since(Utc::now() - Duration::hours(24));
    let runs = store.list_pipeline_runs(&selector)?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, recent.id);

    let by_label = store.list_pipeline_runs(&Selector::default().label("env", "ci"))?;
    assert_eq!(by_label.len(), 3);
    let no_match = store.list_pipeline_runs(&Selector::default().label("env", "prod"))?;
    assert!(no_match.is_empty());

    Ok(())
}

#[test]
fn attestations_are_insert_only() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = EmbeddedStore::open(dir.path())?;

    let run = pipeline_run("release", 1);
    store.put_pipeline_run(&run)?;

    let generator = gantry::attest::AttestationGenerator::new("gantry/test", "v1");
    let document = generator.generate(
        gantry::attest::Invocation {
            pipeline: "release".to_string(),
            pipeline_version: "1".to_string(),
            task: None,
            parameters: BTreeMap::new(),
        },
        vec![],
        vec![],
        BTreeMap::new(),
        run.started_at,
        Utc::now(),
    );

    let record = gantry::store::AttestationRecord {
        id: Uuid::new_v4(),
        run_id: run.id,
        pipeline_run: run.id,
        subject_digest: "sha256:abc".to_string(),
        document: document.clone(),
        created_at: Utc::now(),
    };
    store.put_attestation(&record)?;

    // A second attestation for the same run is refused.
    let duplicate = gantry::store::AttestationRecord {
        id: Uuid::new_v4(),
        run_id: run.id,
        pipeline_run: run.id,
        subject_digest: "sha256:def".to_string(),
        document,
        created_at: Utc::now(),
    };
    assert!(store.put_attestation(&duplicate).is_err());

    Ok(())
}
