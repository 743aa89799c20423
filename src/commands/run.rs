//! Run command: authenticate, open the progress store and back up every site.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use sharepoint_backup::credential::CredentialHandle;
use sharepoint_backup::download::{RetryPolicy, RunContext};
use sharepoint_backup::graph::{AppCredentials, GraphAuth, GraphClient, build_http_client};
use sharepoint_backup::report::StatisticsReport;
use sharepoint_backup::sites::read_sites;
use sharepoint_backup::{
    BackupConfig, Database, DatabaseOptions, Lifecycle, LifecycleSettings, Orchestrator,
    OrchestratorSettings, ProgressStore, RunSummary, SiteDisposition, SiteStatus,
};
use tracing::{error, info, warn};

use crate::progress;

/// Exit code for a run stopped by Ctrl+C.
const EXIT_INTERRUPTED: u8 = 130;

/// Exit code when some sites or files failed.
const EXIT_PARTIAL: u8 = 2;

/// Creates the output directory and checks write access.
pub(crate) fn verify_output_dir(output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory '{}'", output_dir.display())
    })?;
    let marker = output_dir.join(".test_write_access");
    std::fs::write(&marker, b"test")
        .with_context(|| format!("Cannot write to output directory '{}'", output_dir.display()))?;
    std::fs::remove_file(&marker)
        .with_context(|| format!("Failed to remove write marker '{}'", marker.display()))?;
    Ok(())
}

/// Maps a run summary to the process exit code.
pub(crate) fn exit_code_for(summary: &RunSummary) -> ExitCode {
    if summary.halted.is_some() {
        return ExitCode::FAILURE;
    }
    if summary.interrupted {
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    let partial = summary.sites.iter().any(|site| {
        matches!(
            site.disposition,
            SiteDisposition::Failed { .. } | SiteDisposition::Processed(SiteStatus::CompletedWithErrors)
        )
    });
    if partial {
        ExitCode::from(EXIT_PARTIAL)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(summary: &RunSummary) {
    println!("=== Run summary ===");
    for site in &summary.sites {
        let disposition = match &site.disposition {
            SiteDisposition::AlreadyComplete => "already complete".to_string(),
            SiteDisposition::Processed(status) => status.to_string(),
            SiteDisposition::Failed { error, .. } => format!("failed: {error}"),
        };
        println!(
            "  {:<30} {disposition} (libraries: {} processed, {} skipped, {} failed)",
            site.site, site.libraries_processed, site.libraries_skipped, site.libraries_failed
        );
        if site.folders_failed > 0 || site.name_collisions > 0 {
            println!(
                "  {:<30} {} folders could not be listed, {} files share a local path",
                "", site.folders_failed, site.name_collisions
            );
        }
    }
    if let Some(reason) = &summary.halted {
        println!("Run halted: {reason}");
    }
    if summary.interrupted {
        println!("Run interrupted; run again to resume.");
    }
    if let Some(path) = &summary.final_backup {
        println!("Progress database backed up to {}", path.display());
    }
}

pub(crate) async fn run_backup_command(config: &BackupConfig, quiet: bool) -> Result<ExitCode> {
    verify_output_dir(&config.output_dir)?;

    let sites = read_sites(&config.csv_path)?;
    if sites.is_empty() {
        bail!(
            "No sites listed in '{}'.\n  Suggestion: add SiteName,SiteURL rows",
            config.csv_path.display()
        );
    }

    let app_credentials = AppCredentials::load(&config.credentials_path)?;
    let http = build_http_client().context("Failed to build HTTP client")?;
    let auth = Arc::new(GraphAuth::new(http.clone(), app_credentials));
    let credential = auth
        .request_token()
        .await
        .context("Initial authentication failed")?;
    info!("authenticated with Microsoft Graph");

    let db = Database::new_with_options(
        &config.db_path,
        &DatabaseOptions::for_workers(config.num_threads),
    )
    .await
    .with_context(|| format!("Failed to open progress database '{}'", config.db_path.display()))?;
    let store = ProgressStore::new(db);
    let session_id = store.create_session().await?;
    info!(session_id, sites = sites.len(), "backup session started");

    let mut lifecycle_settings = LifecycleSettings::new(&config.output_dir);
    lifecycle_settings.token_refresh_interval = config.token_refresh_interval;
    lifecycle_settings.backup_interval = config.db_backup_interval;
    let lifecycle = Arc::new(Lifecycle::new(
        lifecycle_settings,
        auth,
        CredentialHandle::new(credential),
        store.clone(),
    ));

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight files");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let retry = RetryPolicy::new(config.max_retry, config.retry_delay, config.api_retry_delay);
    let ctx = Arc::new(
        RunContext::new(
            store.clone(),
            Arc::new(GraphClient::new(http)),
            lifecycle,
            retry,
        )
        .with_page_size(config.page_size)
        .with_session(session_id)
        .with_interrupt_flag(Arc::clone(&interrupted)),
    );

    let mut settings = OrchestratorSettings::new(&config.output_dir);
    settings.workers = config.num_threads;
    settings.queue_capacity = config.queue_capacity();
    settings.reauth_every_sites = config.reauth_every_sites;
    let orchestrator = Orchestrator::new(Arc::clone(&ctx), settings);

    let use_spinner = progress::should_use_spinner(
        io::stderr().is_terminal(),
        quiet,
        progress::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) = progress::spawn_progress_ui(use_spinner, store.clone());

    let summary = orchestrator.run(&sites).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let totals = ctx.session.totals();
    if let Err(e) = store.close_session(session_id, &totals).await {
        error!(error = %e, "failed to close session");
    }
    info!(
        processed = totals.files_processed,
        downloaded = totals.files_downloaded,
        failed = totals.files_failed,
        mb = totals.mb_downloaded,
        "backup session finished"
    );

    match StatisticsReport::collect(&store, config.max_retry).await {
        Ok(report) => println!("{report}"),
        Err(e) => warn!(error = %e, "could not collect final statistics"),
    }
    print_summary(&summary);

    store.database().clone().close().await;
    Ok(exit_code_for(&summary))
}
