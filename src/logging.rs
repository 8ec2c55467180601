// src/logging.rs

//! Tracing setup for the `gantry` binary.
//!
//! The effective filter is, in order of precedence: the `--log-level` flag,
//! the `GANTRY_LOG` environment variable, then `info`. Output goes to stderr
//! so stdout stays usable for tooling.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level.as_directive()),
        None => EnvFilter::try_from_env("GANTRY_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
