// tests/signing_roundtrip.rs

//! Signature round-trips: sign-then-verify succeeds, any other key or any
//! payload edit fails.

use std::sync::Arc;

use gantry::dag::PipelineStatus;
use gantry::execute_pipeline;
use gantry::sign::key::sign_payload;
use gantry::sign::{verify_signature, FileSecretStore, Signer, SignerIdentity};
use gantry::store::RunStore;
use gantry::types::{SignerMode, StorageMode};
use gantry_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use gantry_test_utils::deps::memory_deps;
use gantry_test_utils::fake_substrate::FakeSubstrate;
use gantry_test_utils::keys::{generate_signing_key, write_signing_key};
use gantry_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn sign_then_verify_round_trips() -> TestResult {
    let key = generate_signing_key();
    let payload = b"provenance document";

    let sig = sign_payload(&key, payload);
    assert!(verify_signature(&sig, payload)?);

    Ok(())
}

#[test]
fn verification_fails_with_any_other_key() -> TestResult {
    let key = generate_signing_key();
    let other = generate_signing_key();
    let payload = b"provenance document";

    let mut sig = sign_payload(&key, payload);
    sig.public_key = hex::encode(other.verifying_key().as_bytes());

    assert!(!verify_signature(&sig, payload)?);
    Ok(())
}

#[test]
fn verification_fails_after_payload_edit() -> TestResult {
    let key = generate_signing_key();

    let sig = sign_payload(&key, b"original bytes");
    assert!(!verify_signature(&sig, b"edited bytes")?);

    Ok(())
}

#[tokio::test]
async fn key_mode_signs_every_attestation() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (key, key_path) = write_signing_key(dir.path());

    let cfg = ConfigFileBuilder::new("signed")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_signing_mode(SignerMode::Key)
        .with_key_path(key_path.to_str().unwrap())
        .with_task("build", TaskConfigBuilder::new("make").result("digest").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Key,
        Some(key_path.to_string_lossy().into_owned()),
        Arc::new(FileSecretStore::new()),
        None,
    ));
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;
    assert_eq!(report.status, PipelineStatus::Succeeded);

    // The stored signature verifies against the attestation's current bytes
    // and carries the key fingerprint identity.
    let att = store
        .attestation_for_run(report.run_id)?
        .expect("pipeline attestation");
    let sig = store
        .signature_for_attestation(att.id)?
        .expect("attestation signed");

    let payload = att.document.canonical_bytes()?;
    assert!(verify_signature(&sig.signature, &payload)?);
    match &sig.signature.identity {
        SignerIdentity::Key { fingerprint } => {
            assert_eq!(
                fingerprint,
                &gantry_test_utils::keys::fingerprint(&key)
            );
        }
        other => panic!("expected key identity, got {other:?}"),
    }

    // Signed but not policy-verified: compliance stops at level 2.
    assert_eq!(report.compliance.level, 2);

    Ok(())
}

#[tokio::test]
async fn missing_key_degrades_to_unsigned_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new("keyless-key")
        .with_storage(StorageMode::Memory, dir.path().to_str().unwrap())
        .with_signing_mode(SignerMode::Key)
        .with_key_path("/nonexistent/signing.key")
        .with_task("build", TaskConfigBuilder::new("make").build())
        .build();

    let substrate = Arc::new(FakeSubstrate::new());
    let mut deps = memory_deps(substrate);
    deps.signer = Arc::new(Signer::new(
        SignerMode::Key,
        Some("/nonexistent/signing.key".to_string()),
        Arc::new(FileSecretStore::new()),
        None,
    ));
    let store = Arc::clone(&deps.store);

    let report = with_timeout(execute_pipeline(&cfg, Default::default(), deps)).await?;

    // Signing failure is non-fatal: the run stays Succeeded, the gap is
    // recorded.
    assert_eq!(report.status, PipelineStatus::Succeeded);

    let att = store
        .attestation_for_run(report.run_id)?
        .expect("attestation still generated");
    assert!(store.signature_for_attestation(att.id)?.is_none());

    assert_eq!(report.compliance.level, 1);
    assert!(report
        .compliance
        .gaps
        .iter()
        .any(|g| g.evidence.contains("unsigned")));

    Ok(())
}
