//! CLI entry point for the SharePoint backup tool.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sharepoint_backup::BackupConfig;
use sharepoint_backup::download::create_failed_files_log;
use tracing::{debug, info};

mod cli;
mod commands;
mod logging;
mod progress;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    let command = cli.command();

    if let Command::Init(args) = &command {
        logging::init(
            &logging::default_directive(cli.quiet, cli.debug, cli.verbose, "info"),
            None,
            None,
        );
        commands::run_init_command(&args.dir)?;
        return Ok(ExitCode::SUCCESS);
    }

    let (config, config_path) = BackupConfig::load(cli.config.as_deref())?;
    let directive =
        logging::default_directive(cli.quiet, cli.debug, cli.verbose, config.log_directive());

    // Only backup runs write log files; inspection commands log to stderr.
    let (log_file, failed_files) = if command == Command::Run {
        let failed_files = create_failed_files_log(&config.log_dir).with_context(|| {
            format!("Failed to create failure log in '{}'", config.log_dir.display())
        })?;
        (Some(logging::create_log_file(&config.log_dir)?), Some(failed_files))
    } else {
        (None, None)
    };
    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let failed_path = failed_files.as_ref().map(|(path, _)| path.clone());
    logging::init(
        &directive,
        log_file.map(|(_, file)| file),
        failed_files.map(|(_, file)| file),
    );

    debug!(?cli, ?config, "configuration resolved");
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config file");
    }
    if let Some(path) = &log_path {
        info!(path = %path.display(), "logging to file");
    }
    if let Some(path) = &failed_path {
        info!(path = %path.display(), "failure log opened");
    }

    match command {
        Command::Run => commands::run_backup_command(&config, cli.quiet).await,
        Command::Status => commands::run_status_command(&config)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::ResetSite(args) => commands::run_reset_site_command(&config, &args.site)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::FixStats => commands::run_fix_stats_command(&config)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Query(args) => commands::run_query_command(&config, &args.sql)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Monitor(args) => commands::run_monitor_command(&config, &args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Init(_) => Ok(ExitCode::SUCCESS),
    }
}
