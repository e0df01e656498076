//! Diagnostics logging for the courier binary
//!
//! The crate itself only emits `tracing` events. This module wires them to a
//! timestamped file in the diagnostics directory and keeps that directory
//! from growing without bound.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// File name prefix of diagnostics logs
const LOG_FILE_PREFIX: &str = "courier-";

/// Default number of diagnostics files kept
pub const DEFAULT_KEEP_FILES: usize = 10;

/// Information about the current diagnostics file
#[derive(Debug, Clone)]
pub struct LogFileInfo {
    pub path: PathBuf,
}

/// Generate a timestamped diagnostics file path
pub fn create_log_file_path(logs_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    logs_dir.join(format!("{LOG_FILE_PREFIX}{timestamp}.log"))
}

/// Route `tracing` output to a new diagnostics file
///
/// Honors `RUST_LOG`, defaulting to `courier=info`.
pub fn init_file_logging(logs_dir: &Path) -> Result<LogFileInfo> {
    fs::create_dir_all(logs_dir).context("Failed to create logs directory")?;

    let path = create_log_file_path(logs_dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context("Failed to open log file")?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "courier=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogFileInfo { path })
}

/// Delete all but the `keep` newest diagnostics files
///
/// Returns the number of files deleted. Files not matching the diagnostics
/// naming scheme are never touched.
pub fn prune_old_logs(logs_dir: &Path, keep: usize) -> Result<usize> {
    if !logs_dir.exists() {
        return Ok(0);
    }

    let mut logs: Vec<PathBuf> = fs::read_dir(logs_dir)
        .context("Failed to list logs directory")?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"))
        })
        .collect();

    // Timestamped names sort chronologically
    logs.sort();
    let excess = logs.len().saturating_sub(keep);

    Ok(logs
        .iter()
        .take(excess)
        .filter(|path| fs::remove_file(path).is_ok())
        .count())
}
