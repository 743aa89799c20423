//! Monitor command: read-only live dashboard.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::{Context, Result};
use sharepoint_backup::report::DashboardSnapshot;
use sharepoint_backup::{BackupConfig, Database, ProgressStore};

use crate::cli::MonitorArgs;

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

pub(crate) async fn run_monitor_command(config: &BackupConfig, args: &MonitorArgs) -> Result<()> {
    let db = Database::open_read_only(&config.db_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open progress database '{}'",
                config.db_path.display()
            )
        })?;
    let store = ProgressStore::new(db);
    let clear = io::stdout().is_terminal() && !args.once;

    loop {
        let snapshot = DashboardSnapshot::collect(&store).await?;
        if clear {
            print!("{CLEAR_SCREEN}");
        }
        println!("{snapshot}");
        if args.once {
            return Ok(());
        }
        println!("Refreshing every {}s. Press Ctrl+C to exit.", args.interval);

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
