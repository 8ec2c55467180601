// tests/compliance_levels.rs

//! Compliance evaluation scenarios across the level ladder.

use std::sync::Arc;

use gantry::config::{ConfigFile, PolicyConfig, ResourceKind};
use gantry::dag::PipelineStatus;
use gantry::exec::IsolationReport;
use gantry::execute_pipeline;
use gantry::sign::keyless::IDENTITY_TOKEN_ENV;
use gantry::sign::{FileSecretStore, Signer, SignerIdentity};
use gantry::store::RunStore;
use gantry::types::{SignerMode, StorageMode, VerificationMode};
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use gantry_test_utils::deps::memory_deps;
use gantry_test_utils::fake_authority::{FakeAuthority, UnreachableAuthority};
use gantry_test_utils::fake_substrate::{FakeSubstrate, ScriptedOutcome};
use gantry_test_utils::keys::{fingerprint, sign_resource, write_signing_key};
use gantry_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Fully hardened config: signed resources, enforce policies, key signing,
/// hermetic isolation requests on the single build task.
fn hardened_config(
    dir: &std::path::Path,
    key: &ed25519_dalek::SigningKey,
    key_path: &std::path::Path,
) -> ConfigFile {
    let task = TaskConfigBuilder::new("make hermetic")
        .result("digest")
        .network_disabled(true)
        .filesystem_read_only(true)
        .deps_prestaged(true)
        .build();

    let mut raw = ConfigFileBuilder::new("hardened")
        .with_storage(StorageMode::Memory, dir.to_str().unwrap())
        .with_signing_mode(SignerMode::Key)
        .with_key_path(key_path.to_str().unwrap())
        .with_verification_mode(VerificationMode::Enforce)
        .with_policy(PolicyConfig {
            name: "all".to_string(),
            pattern: "*".to_string(),
            identities: vec![fingerprint(key)],
            mode: Some(VerificationMode::Enforce),
        })
        .with_task("build", task.clone())
        .with_signature(sign_resource(ResourceKind::Task, "build", &task, key))
        .build_raw();

    let pipeline_sig =
        sign_resource(ResourceKind::Pipeline, "hardened", &raw.pipeline, key);
    raw.signature.push(pipeline_sig);

    ConfigFile::try_from(raw).expect("valid hardened config")
}

#[tokio::test]
async fn fully_hermetic_verified_run_reaches_level_4() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (key, key_path) = write_signing_key(dir.path());
    let cfg = hardened_config(dir.path(), &key, &key_path);

    let substrate = Arc::new(FakeSubstrate::new());
    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Key,
        Some(key_path.to_string_lossy().into_owned()),
        Arc::new(FileSecretStore::new()),
        None,
    ));

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(report.compliance.level, 4, "gaps: {:?}", report.compliance.gaps);
    assert!(report.compliance.gaps.is_empty());

    Ok(())
}

#[tokio::test]
async fn isolation_violation_caps_level_at_3() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (key, key_path) = write_signing_key(dir.path());
    let cfg = hardened_config(dir.path(), &key, &key_path);

    let substrate = Arc::new(FakeSubstrate::new());
    // The substrate ran the task in an isolated context but could not cut
    // the network: an outbound connection was possible.
    substrate.script(
        "build",
        ScriptedOutcome::default().with_isolation(IsolationReport {
            context_isolated: true,
            network_isolated: Some(false),
            filesystem_read_only: Some(true),
            deps_prestaged: Some(true),
        }),
    );

    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Key,
        Some(key_path.to_string_lossy().into_owned()),
        Arc::new(FileSecretStore::new()),
        None,
    ));
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // Report-mode enforcement: the run still succeeds but the violation is
    // on the record and hermeticity is off the table.
    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(report.compliance.level, 3, "gaps: {:?}", report.compliance.gaps);
    assert!(report
        .compliance
        .gaps
        .iter()
        .any(|g| g.evidence.contains("network")));

    let task_runs = store.task_runs_of(report.run_id)?;
    assert!(task_runs
        .iter()
        .any(|t| t.violations.iter().any(|v| v.contains("network"))));

    Ok(())
}

#[tokio::test]
async fn unreachable_keyless_authority_leaves_level_1_citing_unsigned() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    unsafe { std::env::set_var(IDENTITY_TOKEN_ENV, "test-token") };

    let cfg = ConfigFileBuilder::new("keyless")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_signing_mode(SignerMode::Keyless)
        .with_authority_url("https://authority.invalid")
        .with_task("build", TaskConfigBuilder::new("make").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Keyless,
        None,
        Arc::new(FileSecretStore::new()),
        Some(Arc::new(UnreachableAuthority)),
    ));
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // Signing failure never fails the build.
    assert_eq!(report.status, PipelineStatus::Succeeded);

    let att = store
        .attestation_for_run(report.run_id)?
        .expect("attestation generated");
    assert!(store.signature_for_attestation(att.id)?.is_none());

    assert_eq!(report.compliance.level, 1);
    let gap = report
        .compliance
        .gaps
        .iter()
        .find(|g| g.evidence.contains("unsigned"))
        .expect("unsigned cited as the specific gap");
    assert!(gap.evidence.contains("unreachable"), "gap: {}", gap.evidence);

    Ok(())
}

#[tokio::test]
async fn reachable_authority_yields_certificate_identity() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    unsafe { std::env::set_var(IDENTITY_TOKEN_ENV, "test-token") };

    let cfg = ConfigFileBuilder::new("keyless-ok")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_signing_mode(SignerMode::Keyless)
        .with_authority_url("https://authority.example")
        .with_task("build", TaskConfigBuilder::new("make").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Keyless,
        None,
        Arc::new(FileSecretStore::new()),
        Some(Arc::new(FakeAuthority::new("builder@ci.example"))),
    ));
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
    assert_eq!(report.status, PipelineStatus::Succeeded);

    let att = store
        .attestation_for_run(report.run_id)?
        .expect("attestation generated");
    let sig = store
        .signature_for_attestation(att.id)?
        .expect("attestation signed via keyless flow");

    match &sig.signature.identity {
        SignerIdentity::Certificate { identity, .. } => {
            assert_eq!(identity, "builder@ci.example");
        }
        other => panic!("expected certificate identity, got {other:?}"),
    }

    // Verifies offline against the embedded ephemeral public key.
    let payload = att.document.canonical_bytes()?;
    assert!(gantry::sign::verify_signature(&sig.signature, &payload)?);

    Ok(())
}
