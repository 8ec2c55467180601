//! Shared helpers for gantry's integration tests: config and task builders,
//! a scripted execution substrate, fake signing authorities, and signing-key
//! helpers.

pub mod builders;
pub mod deps;
pub mod fake_authority;
pub mod fake_substrate;
pub mod keys;

use std::future::Future;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Tracing for tests, honouring `RUST_LOG`. Goes through the test writer,
/// so output only shows up for failing tests (or with `-- --nocapture`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// Guard against a hung runtime: fail the test instead of blocking forever.
pub async fn with_timeout<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test timed out after 5 seconds")
}
