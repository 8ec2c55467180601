// tests/config_validation.rs

//! Definition-time validation: bad pipelines are rejected before any run
//! object exists.

use gantry::config::{ConfigFile, RawConfigFile};
use gantry::errors::EngineError;
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

fn expect_definition_error(raw: RawConfigFile) -> String {
    match ConfigFile::try_from(raw) {
        Err(EngineError::Definition(msg)) => msg,
        Err(other) => panic!("expected DefinitionError, got {other:?}"),
        Ok(_) => panic!("expected DefinitionError, got a valid config"),
    }
}

#[test]
fn rejects_cyclic_after_edges() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").after("b").build())
        .with_task("b", TaskConfigBuilder::new("echo b").after("a").build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("cycle"), "unexpected message: {msg}");
}

#[test]
fn rejects_cycle_through_result_references() {
    // a -> b via `after`, b -> a via result reference.
    let raw = ConfigFileBuilder::new("p")
        .with_task(
            "a",
            TaskConfigBuilder::new("echo $(tasks.b.results.out)")
                .result("out")
                .build(),
        )
        .with_task(
            "b",
            TaskConfigBuilder::new("echo b").result("out").after("a").build(),
        )
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("cycle"), "unexpected message: {msg}");
}

#[test]
fn rejects_unknown_dependency() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").after("ghost").build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("ghost"), "unexpected message: {msg}");
}

#[test]
fn rejects_self_dependency() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").after("a").build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("itself"), "unexpected message: {msg}");
}

#[test]
fn rejects_reference_to_undeclared_result() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").build())
        .with_task(
            "b",
            TaskConfigBuilder::new("echo $(tasks.a.results.missing)").build(),
        )
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("missing"), "unexpected message: {msg}");
}

#[test]
fn rejects_unknown_parameter_reference() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo $(params.nope)").build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("nope"), "unexpected message: {msg}");
}

#[test]
fn rejects_task_without_steps() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::empty().build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("steps"), "unexpected message: {msg}");
}

#[test]
fn rejects_pipeline_result_for_unknown_task() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").build())
        .with_pipeline_result("digest", "$(tasks.ghost.results.digest)")
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("ghost"), "unexpected message: {msg}");
}

#[test]
fn rejects_invalid_timeout() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").timeout("soon").build())
        .build_raw();

    let msg = expect_definition_error(raw);
    assert!(msg.contains("duration"), "unexpected message: {msg}");
}

#[test]
fn rejects_zero_max_parallel() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::new("echo a").build())
        .with_max_parallel(0)
        .build_raw();

    match ConfigFile::try_from(raw) {
        Err(EngineError::Config(msg)) => {
            assert!(msg.contains("max_parallel"), "unexpected message: {msg}")
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn parses_full_toml_definition() {
    let toml = r#"
        [engine]
        max_parallel = 2
        task_timeout = "90s"

        [signing]
        mode = "key"
        key_path = "keys/signing.key"
        transparency = true

        [verification]
        mode = "warn"

        [[verification.policy]]
        name = "build-tasks"
        pattern = "build-*"
        identities = ["aabbcc"]
        mode = "enforce"

        [pipeline]
        name = "release"

        [pipeline.params.tag]
        default = "latest"

        [pipeline.results]
        digest = "$(tasks.build-image.results.digest)"

        [workspace.source]

        [task.build-image]
        workspaces = ["source"]

        [task.build-image.isolation]
        network_disabled = true

        [task.build-image.results.digest]
        description = "image digest"

        [[task.build-image.steps]]
        name = "build"
        command = "make build TAG=$(params.tag)"
    "#;

    let raw: RawConfigFile = toml::from_str(toml).expect("parse TOML");
    let cfg = ConfigFile::try_from(raw).expect("validate config");

    assert_eq!(cfg.engine.max_parallel, 2);
    assert_eq!(cfg.pipeline.name, "release");
    let task = cfg.task.get("build-image").expect("task present");
    assert!(task.isolation.network_disabled);
    assert_eq!(cfg.verification.policy.len(), 1);
}
