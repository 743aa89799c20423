//! Progress UI (spinner) for backup runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use sharepoint_backup::{FileStatus, ProgressStore};

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_spinner(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Spawns the spinner when requested.
/// Returns (handle, stop); with the spinner disabled the handle is `None`
/// and stop is already set.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    store: ProgressStore,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(store, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(store: ProgressStore, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            let completed = store
                .count_by_status(FileStatus::Completed)
                .await
                .unwrap_or(0);
            let failed = store.count_by_status(FileStatus::Failed).await.unwrap_or(0);
            let downloading = store
                .count_by_status(FileStatus::Downloading)
                .await
                .unwrap_or(0);

            spinner.set_message(format!(
                "completed {completed} | failed {failed} | downloading {downloading}"
            ));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        spinner.finish_and_clear();
    })
}
