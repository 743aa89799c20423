//! Tracing subscriber setup: stderr, an optional per-run log file and the
//! failed-files log.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use sharepoint_backup::download::failed_files_layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::util::SubscriberInitExt;

/// Prefix of per-run log files.
pub(crate) const LOG_FILE_PREFIX: &str = "sharepoint_backup_";

/// Filter directive from CLI flags, falling back to the config level.
///
/// Priority: quiet > debug flag > verbose count > config. `RUST_LOG` wins over
/// all of these in [`init`].
pub(crate) fn default_directive(quiet: bool, debug: bool, verbose: u8, config: &str) -> String {
    if quiet {
        return "error".to_string();
    }
    match (debug, verbose) {
        (_, 2..) => "trace".to_string(),
        (true, _) | (false, 1) => "debug".to_string(),
        (false, 0) => config.to_string(),
    }
}

/// Creates `log_dir/sharepoint_backup_<timestamp>.log`.
pub(crate) fn create_log_file(log_dir: &Path) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory '{}'", log_dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = log_dir.join(format!("{LOG_FILE_PREFIX}{stamp}.log"));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
    Ok((path, file))
}

/// Installs the global subscriber.
///
/// When `log_file` is given, every event is also written there without ANSI
/// colours. When `failed_files` is given, terminal file failures are written
/// there as well, whatever the filter directive says.
pub(crate) fn init(directive: &str, log_file: Option<File>, failed_files: Option<File>) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter())
    });
    let failed_layer = failed_files.map(failed_files_layer);

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(failed_layer)
        .try_init();
}
