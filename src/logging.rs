//! Console and per-run file logging.
//!
//! Every event goes to stderr and to `<log_outdir>/<run_id>.log`. `RUST_LOG`
//! takes precedence over the configured `log_level`.
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::SystemConfig;

pub fn filter(system: &SystemConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&system.log_level))
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init(system: &SystemConfig, log_path: &Path) -> Result<()> {
    let file = File::create(log_path)
        .with_context(|| format!("Unable to create log file {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter(system))
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("Unable to initialize logging: {e}"))
}
