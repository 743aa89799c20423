//! Store inspection and maintenance commands: status, fix-stats, reset-site, query.

use std::path::Path;

use anyhow::{Context, Result};
use sharepoint_backup::report::{QueryResult, SiteTable, StatisticsReport};
use sharepoint_backup::{BackupConfig, Database, ProgressStore};

async fn open_read_only(db_path: &Path) -> Result<Database> {
    Database::open_read_only(db_path)
        .await
        .with_context(|| format!("Failed to open progress database '{}'", db_path.display()))
}

async fn open_read_write(db_path: &Path) -> Result<ProgressStore> {
    let db = Database::new(db_path)
        .await
        .with_context(|| format!("Failed to open progress database '{}'", db_path.display()))?;
    Ok(ProgressStore::new(db))
}

pub(crate) async fn run_status_command(config: &BackupConfig) -> Result<()> {
    let store = ProgressStore::new(open_read_only(&config.db_path).await?);
    println!("{}", SiteTable::collect(&store).await?);
    println!("{}", StatisticsReport::collect(&store, config.max_retry).await?);
    Ok(())
}

pub(crate) async fn run_fix_stats_command(config: &BackupConfig) -> Result<()> {
    let store = open_read_write(&config.db_path).await?;
    let before = store.counters().await?;
    let after = store.recompute_counters().await?;

    println!("Counters recomputed from file records:");
    println!(
        "  total files           {} -> {}",
        before.total_files, after.total_files
    );
    println!(
        "  successful downloads  {} -> {}",
        before.successful_downloads, after.successful_downloads
    );
    println!(
        "  failed downloads      {} -> {}",
        before.failed_downloads, after.failed_downloads
    );
    println!(
        "  MB downloaded         {:.2} -> {:.2}",
        before.mb_downloaded, after.mb_downloaded
    );
    Ok(())
}

pub(crate) async fn run_reset_site_command(config: &BackupConfig, site: &str) -> Result<()> {
    let store = open_read_write(&config.db_path).await?;
    let reset = store
        .reset_site(site)
        .await
        .with_context(|| format!("Failed to reset site '{site}'"))?;
    println!("Reset site '{site}': {reset} unfinished file records returned to discovered.");
    Ok(())
}

pub(crate) async fn run_query_command(config: &BackupConfig, sql: &str) -> Result<()> {
    let db = open_read_only(&config.db_path).await?;
    let result = QueryResult::run(&db, sql).await.context("Query failed")?;
    print!("{result}");
    Ok(())
}
