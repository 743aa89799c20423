//! Read-only reports over the progress store.
//!
//! Nothing here writes. The monitor and query commands run these against a
//! read-only database handle while a backup is in progress.

use std::fmt;

use chrono::{NaiveDateTime, Utc};
use sqlx::{Column, Row, ValueRef};

use crate::Database;
use crate::store::{
    CounterSnapshot, FailedFile, FileStatus, ProgressStore, SessionRecord, SiteRecord, SiteStatus,
    StoreError,
};

/// Exhausted failures listed in the statistics report.
const REPORT_FAILURE_LIMIT: i64 = 10;

/// Window for "completed recently" on the dashboard.
const RECENT_COMPLETION_MINUTES: u32 = 5;

/// Window for "failed recently" on the dashboard.
const RECENT_FAILURE_MINUTES: u32 = 10;

/// Width of the dashboard progress bar.
const PROGRESS_BAR_WIDTH: usize = 40;

/// Timestamp format written by `SQLite`'s `datetime('now')`.
const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// Formats megabytes as MB or GB.
#[must_use]
pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{mb:.2} MB")
    }
}

/// Renders a fixed-width text progress bar.
#[must_use]
pub fn progress_bar(done: i64, total: i64) -> String {
    if total <= 0 {
        return format!("[{}]   0.0%", " ".repeat(PROGRESS_BAR_WIDTH));
    }
    #[allow(clippy::cast_precision_loss)]
    let fraction = (done.clamp(0, total) as f64) / (total as f64);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:5.1}%",
        "#".repeat(filled),
        " ".repeat(PROGRESS_BAR_WIDTH - filled),
        fraction * 100.0
    )
}

fn write_failures(f: &mut fmt::Formatter<'_>, failures: &[FailedFile]) -> fmt::Result {
    for failure in failures {
        writeln!(
            f,
            "  {} [{}] ({} attempts): {}",
            failure.file_path,
            failure.site_name,
            failure.attempt_count,
            failure.error_message.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

/// Status counts, counters and exhausted failures.
#[derive(Debug, Clone)]
pub struct StatisticsReport {
    /// Records per status.
    pub status_counts: Vec<(String, i64)>,
    /// Global counters.
    pub counters: CounterSnapshot,
    /// Files currently `downloading`.
    pub downloading: i64,
    /// Failed files with every attempt used.
    pub exhausted: Vec<FailedFile>,
    /// Attempt limit used to select `exhausted`.
    pub max_attempts: u32,
}

impl StatisticsReport {
    /// Reads the report from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a query fails.
    pub async fn collect(store: &ProgressStore, max_attempts: u32) -> Result<Self, StoreError> {
        Ok(Self {
            status_counts: store.status_counts().await?,
            counters: store.counters().await?,
            downloading: store.count_by_status(FileStatus::Downloading).await?,
            exhausted: store
                .exhausted_failures(max_attempts, REPORT_FAILURE_LIMIT)
                .await?,
            max_attempts,
        })
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backup statistics ===")?;
        writeln!(f, "Files by status:")?;
        if self.status_counts.is_empty() {
            writeln!(f, "  (no files recorded)")?;
        }
        for (status, count) in &self.status_counts {
            writeln!(f, "  {status:<12} {count}")?;
        }

        let c = &self.counters;
        writeln!(f, "Counters:")?;
        writeln!(f, "  total files           {}", c.total_files)?;
        writeln!(f, "  successful downloads  {}", c.successful_downloads)?;
        writeln!(f, "  failed downloads      {}", c.failed_downloads)?;
        writeln!(f, "  skipped existing      {}", c.skipped_existing)?;
        writeln!(f, "  api errors            {}", c.api_errors)?;
        writeln!(f, "  downloaded            {}", format_mb(c.mb_downloaded))?;
        writeln!(f, "Currently downloading: {}", self.downloading)?;

        if !self.exhausted.is_empty() {
            writeln!(
                f,
                "Failed files (attempts >= {}, first {}):",
                self.max_attempts, REPORT_FAILURE_LIMIT
            )?;
            write_failures(f, &self.exhausted)?;
        }
        Ok(())
    }
}

/// Per-site status table.
#[derive(Debug, Clone)]
pub struct SiteTable {
    /// Site rows, most recently updated first.
    pub sites: Vec<SiteRecord>,
}

impl SiteTable {
    /// Reads every site record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn collect(store: &ProgressStore) -> Result<Self, StoreError> {
        Ok(Self {
            sites: store.list_sites().await?,
        })
    }
}

impl fmt::Display for SiteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sites.is_empty() {
            return writeln!(f, "No sites recorded yet.");
        }
        writeln!(
            f,
            "{:<30} {:<22} {:>8} {:>10} {:>8}  {}",
            "Site", "Status", "Total", "Completed", "Failed", "Last update"
        )?;
        writeln!(f, "{}", "-".repeat(100))?;
        for site in &self.sites {
            writeln!(
                f,
                "{:<30} {:<22} {:>8} {:>10} {:>8}  {}",
                site.site_name,
                site.status(),
                site.total_files,
                site.completed_files,
                site.failed_files,
                site.last_updated
            )?;
        }
        Ok(())
    }
}

/// One refresh of the live dashboard.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    /// All site records.
    pub sites: Vec<SiteRecord>,
    /// Records per status.
    pub status_counts: Vec<(String, i64)>,
    /// Global counters.
    pub counters: CounterSnapshot,
    /// Files completed in the last few minutes.
    pub completed_recently: i64,
    /// Files currently `downloading`.
    pub downloading: i64,
    /// The newest session that has not ended.
    pub session: Option<SessionRecord>,
    /// Failures in the last few minutes.
    pub recent_failures: Vec<FailedFile>,
    /// Seconds the open session has been running, when known.
    pub session_runtime_secs: Option<i64>,
}

impl DashboardSnapshot {
    /// Reads a dashboard snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a query fails.
    pub async fn collect(store: &ProgressStore) -> Result<Self, StoreError> {
        let session = store.open_session().await?;
        let session_runtime_secs = session
            .as_ref()
            .and_then(|s| NaiveDateTime::parse_from_str(&s.start_time, SQLITE_TIMESTAMP).ok())
            .map(|start| (Utc::now().naive_utc() - start).num_seconds().max(0));

        Ok(Self {
            sites: store.list_sites().await?,
            status_counts: store.status_counts().await?,
            counters: store.counters().await?,
            completed_recently: store.completed_within(RECENT_COMPLETION_MINUTES).await?,
            downloading: store.count_by_status(FileStatus::Downloading).await?,
            session,
            recent_failures: store
                .recent_failures(RECENT_FAILURE_MINUTES, REPORT_FAILURE_LIMIT)
                .await?,
            session_runtime_secs,
        })
    }

    /// The site currently being processed, if any.
    #[must_use]
    pub fn current_site(&self) -> Option<&SiteRecord> {
        self.sites
            .iter()
            .find(|s| s.status() == SiteStatus::Processing)
    }

    fn count(&self, status: FileStatus) -> i64 {
        self.status_counts
            .iter()
            .find(|(name, _)| name == status.as_str())
            .map_or(0, |(_, count)| *count)
    }
}

impl fmt::Display for DashboardSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SharePoint backup monitor ===")?;

        let finished = self.sites.iter().filter(|s| s.status().is_finished()).count();
        writeln!(f, "Sites: {} recorded, {finished} finished", self.sites.len())?;
        match self.current_site() {
            Some(site) => writeln!(
                f,
                "Current site: {} ({} of {} files done)",
                site.site_name, site.completed_files, site.total_files
            )?,
            None => writeln!(f, "Current site: none")?,
        }

        writeln!(f)?;
        writeln!(f, "Files by status:")?;
        for (status, count) in &self.status_counts {
            writeln!(f, "  {status:<12} {count}")?;
        }

        let total: i64 = self.status_counts.iter().map(|(_, c)| c).sum();
        let completed = self.count(FileStatus::Completed);
        writeln!(f, "Progress: {}", progress_bar(completed, total))?;
        writeln!(
            f,
            "Downloaded: {} | skipped existing: {} | api errors: {}",
            format_mb(self.counters.mb_downloaded),
            self.counters.skipped_existing,
            self.counters.api_errors
        )?;
        writeln!(
            f,
            "Completed in last {RECENT_COMPLETION_MINUTES} min: {} | currently downloading: {}",
            self.completed_recently, self.downloading
        )?;

        if let (Some(session), Some(secs)) = (&self.session, self.session_runtime_secs) {
            #[allow(clippy::cast_precision_loss)]
            let minutes = (secs as f64 / 60.0).max(1.0 / 60.0);
            #[allow(clippy::cast_precision_loss)]
            let rate = session.files_processed as f64 / minutes;
            writeln!(
                f,
                "Session #{}: running {}h {:02}m, {} files processed ({rate:.1}/min)",
                session.id,
                secs / 3600,
                (secs % 3600) / 60,
                session.files_processed
            )?;
        }

        if !self.recent_failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures in last {RECENT_FAILURE_MINUTES} min:")?;
            write_failures(f, &self.recent_failures)?;
        }
        Ok(())
    }
}

/// Rows returned by an ad-hoc query, rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows with every value rendered as text.
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// Runs `sql` and renders every value as text.
    ///
    /// Callers pass a read-only handle; a write statement fails there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the statement fails.
    pub async fn run(db: &Database, sql: &str) -> Result<Self, StoreError> {
        let rows = sqlx::query(sql).fetch_all(db.pool()).await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| render_value(row, i)).collect())
            .collect();

        Ok(Self { columns, rows })
    }
}

fn render_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> String {
    if row.try_get_raw(index).map_or(true, |raw| raw.is_null()) {
        return "NULL".to_string();
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return value.to_string();
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return value.to_string();
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return value;
    }
    match row.try_get::<Vec<u8>, _>(index) {
        Ok(bytes) => format!("<{} bytes>", bytes.len()),
        Err(_) => "?".to_string(),
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "(no rows)");
        }
        writeln!(f, "{}", self.columns.join(" | "))?;
        writeln!(f, "{}", "-".repeat(self.columns.join(" | ").len()))?;
        for row in &self.rows {
            writeln!(f, "{}", row.join(" | "))?;
        }
        writeln!(f, "({} rows)", self.rows.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::NewDiscovery;

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(12.5), "12.50 MB");
        assert_eq!(format_mb(2048.0), "2.00 GB");
    }

    #[test]
    fn test_progress_bar_bounds() {
        assert!(progress_bar(0, 0).ends_with("0.0%"));
        assert!(progress_bar(5, 10).contains("50.0%"));
        let full = progress_bar(10, 10);
        assert!(full.contains(&"#".repeat(PROGRESS_BAR_WIDTH)));
        assert!(full.contains("100.0%"));
    }

    #[tokio::test]
    async fn test_statistics_report_lists_exhausted_failures() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());
        for name in ["a.txt", "b.txt"] {
            let path = format!("/out/Engineering/Documents/{name}");
            store
                .record_discovery(&NewDiscovery {
                    path: &path,
                    site: "Engineering",
                    library: "Documents",
                    file_name: name,
                    size_bytes: Some(1024),
                })
                .await
                .unwrap();
        }
        for _ in 0..3 {
            store
                .mark_downloading("/out/Engineering/Documents/b.txt")
                .await
                .unwrap();
        }
        store
            .mark_failed("/out/Engineering/Documents/b.txt", "HTTP 500")
            .await
            .unwrap();

        let report = StatisticsReport::collect(&store, 3).await.unwrap();
        let rendered = report.to_string();

        assert_eq!(report.exhausted.len(), 1);
        assert!(rendered.contains("b.txt"));
        assert!(rendered.contains("HTTP 500"));
        assert!(rendered.contains("discovered"));
    }

    #[tokio::test]
    async fn test_query_result_renders_mixed_types() {
        let db = Database::new_in_memory().await.unwrap();

        let result = QueryResult::run(&db, "SELECT 1 AS n, 'x' AS s, NULL AS z, 1.5 AS f")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["n", "s", "z", "f"]);
        assert_eq!(result.rows, vec![vec!["1", "x", "NULL", "1.5"]]);
        assert!(result.to_string().contains("n | s | z | f"));
    }

    #[tokio::test]
    async fn test_site_table_empty() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());
        let table = SiteTable::collect(&store).await.unwrap();
        assert!(table.to_string().contains("No sites"));
    }
}
