//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Resumable backup of SharePoint document libraries.
///
/// Mirrors every document library of the listed sites to local storage and
/// tracks each file in a progress database, so interrupted runs resume.
#[derive(Parser, Debug)]
#[command(name = "sharepoint-backup")]
#[command(author, version, about)]
pub struct Cli {
    /// Config file (default: $SHAREPOINT_BACKUP_CONFIG, then ./config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging (same as DEBUG_MODE = true)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Back up every site in the sites list (default)
    Run,
    /// Show per-site status and overall statistics
    Status,
    /// Forget a site's progress so it is processed again
    ResetSite(ResetSiteArgs),
    /// Recompute counters from the per-file records
    FixStats,
    /// Run a read-only SQL query against the progress database
    Query(QueryArgs),
    /// Live dashboard over the progress database
    Monitor(MonitorArgs),
    /// Write sample config, sites list and credentials template
    Init(InitArgs),
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct ResetSiteArgs {
    /// Site name as listed in the sites file
    pub site: String,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct QueryArgs {
    /// SQL statement
    pub sql: String,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct MonitorArgs {
    /// Seconds between refreshes (1-3600)
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub interval: u64,

    /// Print one snapshot and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct InitArgs {
    /// Directory receiving the sample files
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

impl Cli {
    /// The subcommand, defaulting to `run`.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
