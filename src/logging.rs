//! Diagnostics setup.
//!
//! `tracing` events go to stderr, or to `[logging] file` when configured, so
//! stdout stays reserved for command output. Verbosity follows `RUST_LOG`
//! and defaults to `info`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(config: &LoggingConfig) -> Result<()> {
    match config.file.as_deref() {
        Some(path) => init_file(path),
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .try_init();
            Ok(())
        }
    }
}

fn init_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .try_init();
    Ok(())
}
