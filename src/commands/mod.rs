//! CLI command handlers.

mod init;
mod inspect;
mod monitor;
mod run;

pub(crate) use init::run_init_command;
pub(crate) use inspect::{
    run_fix_stats_command, run_query_command, run_reset_site_command, run_status_command,
};
pub(crate) use monitor::run_monitor_command;
pub(crate) use run::run_backup_command;
