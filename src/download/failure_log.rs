//! Dedicated log of files that exhausted their attempts.
//!
//! Terminal failures are tracing events on [`FAILED_FILES_TARGET`]. The layer
//! from [`failed_files_layer`] writes exactly those events to their own file;
//! the other sinks still see them as ordinary errors.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{Level, Subscriber, error};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::registry::LookupSpan;

/// File name prefix of failure logs.
pub const FAILURE_LOG_PREFIX: &str = "sharepoint_backup_failed_files_";

/// Tracing target of terminal file failures.
pub const FAILED_FILES_TARGET: &str = "sharepoint_backup::failed_files";

/// Emits one terminal file failure.
pub fn record_failure(path: &str, attempts: i64, message: &str) {
    error!(
        target: FAILED_FILES_TARGET,
        path = %path,
        attempts,
        error = %message.replace('\n', " "),
        "download failed"
    );
}

/// Creates `log_dir/sharepoint_backup_failed_files_<timestamp>.log` for appending.
///
/// # Errors
///
/// Returns an IO error if the directory or file cannot be created.
pub fn create_failed_files_log(log_dir: &Path) -> io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = log_dir.join(format!("{FAILURE_LOG_PREFIX}{stamp}.log"));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Formatting layer that writes only [`FAILED_FILES_TARGET`] events to `file`.
pub fn failed_files_layer<S>(file: File) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_writer(Mutex::new(file))
        .with_filter(Targets::new().with_target(FAILED_FILES_TARGET, Level::ERROR))
}
