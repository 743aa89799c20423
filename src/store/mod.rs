//! Progress store: the durable system of record for resumable backups.
//!
//! Every download record, site rollup, global counter and run session lives
//! in `SQLite`. Each operation here is a single short statement or a single
//! short transaction that commits before returning, so a crash loses at most
//! the update that was in flight.
//!
//! # Overview
//!
//! - [`ProgressStore`] - main interface for store operations
//! - [`ProgressRepository`] - trait seam used by workers and the orchestrator
//! - [`DownloadRecord`], [`SiteRecord`], [`SessionRecord`] - persisted rows
//! - [`FileStatus`], [`SiteStatus`] - lifecycle states
//!
//! # Example
//!
//! ```ignore
//! use sharepoint_backup::store::{NewDiscovery, ProgressStore};
//! use sharepoint_backup::Database;
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("progress.db")).await?;
//! let store = ProgressStore::new(db);
//!
//! let inserted = store.record_discovery(&NewDiscovery {
//!     path: "backup/Engineering/Documents/spec.docx",
//!     site: "Engineering",
//!     library: "Documents",
//!     file_name: "spec.docx",
//!     size_bytes: Some(4096),
//! }).await?;
//! store.mark_downloading("backup/Engineering/Documents/spec.docx").await?;
//! store.mark_completed("backup/Engineering/Documents/spec.docx", Some(4096)).await?;
//! ```

mod error;
mod record;
mod repository;

pub use error::{StoreError, StoreErrorKind};
pub use record::{
    Counter, CounterSnapshot, DownloadRecord, FailedFile, FileState, FileStatus, SessionRecord,
    SessionTotals, SiteRecord, SiteRollup, SiteStatus, bytes_to_mb,
};
pub use repository::ProgressRepository;

use std::path::Path;

use sqlx::{Row, Sqlite};
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Columns aggregated into a [`SiteRollup`].
const ROLLUP_COLUMNS: &str = r"
    COUNT(*) AS total,
    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
    COALESCE(SUM(CASE WHEN status = 'discovered' THEN 1 ELSE 0 END), 0) AS discovered,
    COALESCE(SUM(CASE WHEN status = 'downloading' THEN 1 ELSE 0 END), 0) AS downloading";

/// A newly discovered remote file.
#[derive(Debug, Clone, Copy)]
pub struct NewDiscovery<'a> {
    /// Local destination path; the record's unique key.
    pub path: &'a str,
    /// Owning site name.
    pub site: &'a str,
    /// Owning library name.
    pub library: &'a str,
    /// Remote file name.
    pub file_name: &'a str,
    /// Remote size in bytes, when the provider reports it.
    pub size_bytes: Option<u64>,
}

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::RecordNotFound`].
fn check_affected(path: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::RecordNotFound(path.to_string()))
    } else {
        Ok(())
    }
}

/// Adds `by` to a counter inside whatever transaction or connection `executor` is.
async fn bump_counter<'e, E>(executor: E, counter: Counter, by: f64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"UPDATE statistics
          SET stat_value = stat_value + ?, last_updated = datetime('now')
          WHERE stat_name = ?",
    )
    .bind(by)
    .bind(counter.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

/// Progress store backed by `SQLite` in WAL mode.
///
/// Cheap to clone; clones share the same connection pool, and every
/// concurrent caller checks out its own pooled connection per operation.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    db: Database,
}

impl ProgressStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Download records ====================

    /// Records a discovered file if its path has no record yet.
    ///
    /// Re-discovering a known path is a no-op and returns `false`.
    /// A fresh insert also bumps the `total_files` counter in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, discovery), fields(path = %discovery.path))]
    pub async fn record_discovery(&self, discovery: &NewDiscovery<'_>) -> Result<bool> {
        let size_mb = discovery.size_bytes.map(bytes_to_mb);
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r"INSERT INTO downloads
                (file_path, site_name, library_name, file_name, file_size_mb, status, attempt_count)
              VALUES (?, ?, ?, ?, ?, ?, 0)
              ON CONFLICT(file_path) DO NOTHING",
        )
        .bind(discovery.path)
        .bind(discovery.site)
        .bind(discovery.library)
        .bind(discovery.file_name)
        .bind(size_mb)
        .bind(FileStatus::Discovered.as_str())
        .execute(&mut *tx)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            bump_counter(&mut *tx, Counter::TotalFiles, 1.0).await?;
        }
        tx.commit().await?;

        Ok(inserted)
    }

    /// Returns the status and attempt count for a path, if it has a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails, or
    /// [`StoreError::InvalidStatus`] if the stored status is unreadable.
    pub async fn file_state(&self, path: &str) -> Result<Option<FileState>> {
        let row = sqlx::query(r"SELECT status, attempt_count FROM downloads WHERE file_path = ?")
            .bind(path)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| {
            let status: String = row.get("status");
            let status = status
                .parse::<FileStatus>()
                .map_err(|_| StoreError::InvalidStatus(status))?;
            Ok(FileState {
                status,
                attempt_count: row.get("attempt_count"),
            })
        })
        .transpose()
    }

    /// Gets a full download record by path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get(&self, path: &str) -> Result<Option<DownloadRecord>> {
        let record =
            sqlx::query_as::<_, DownloadRecord>(r"SELECT * FROM downloads WHERE file_path = ?")
                .bind(path)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(record)
    }

    /// Lists every record for a site, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_for_site(&self, site: &str) -> Result<Vec<DownloadRecord>> {
        let records = sqlx::query_as::<_, DownloadRecord>(
            r"SELECT * FROM downloads WHERE site_name = ? ORDER BY file_path",
        )
        .bind(site)
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    /// Claims a file for one download attempt.
    ///
    /// Sets `downloading`, increments `attempt_count` and stamps `last_attempt`.
    /// Returns the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if the path has no record.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_downloading(&self, path: &str) -> Result<i64> {
        let row = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  attempt_count = attempt_count + 1,
                  last_attempt = datetime('now')
              WHERE file_path = ?
              RETURNING attempt_count",
        )
        .bind(FileStatus::Downloading.as_str())
        .bind(path)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| row.get::<i64, _>("attempt_count"))
            .ok_or_else(|| StoreError::RecordNotFound(path.to_string()))
    }

    /// Marks a file completed and credits the success counters.
    ///
    /// The status write, `successful_downloads` and `mb_downloaded` are one
    /// transaction. When `size_bytes` is `None` the previously known size is
    /// kept and credited. Returns the credited size in megabytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if the path has no record.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, path: &str, size_bytes: Option<u64>) -> Result<f64> {
        let size_mb = size_bytes.map(bytes_to_mb);
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  completed_at = datetime('now'),
                  error_message = NULL,
                  file_size_mb = COALESCE(?, file_size_mb)
              WHERE file_path = ?
              RETURNING file_size_mb",
        )
        .bind(FileStatus::Completed.as_str())
        .bind(size_mb)
        .bind(path)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::RecordNotFound(path.to_string()))?;

        let credited_mb: f64 = row.get::<Option<f64>, _>("file_size_mb").unwrap_or(0.0);
        bump_counter(&mut *tx, Counter::SuccessfulDownloads, 1.0).await?;
        if credited_mb > 0.0 {
            bump_counter(&mut *tx, Counter::MbDownloaded, credited_mb).await?;
        }
        tx.commit().await?;

        Ok(credited_mb)
    }

    /// Marks a file failed with an error message and credits `failed_downloads`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if the path has no record.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(error = %error))]
    pub async fn mark_failed(&self, path: &str, error: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, error_message = ?, last_attempt = datetime('now')
              WHERE file_path = ?",
        )
        .bind(FileStatus::Failed.as_str())
        .bind(error)
        .bind(path)
        .execute(&mut *tx)
        .await?;
        check_affected(path, result.rows_affected())?;

        bump_counter(&mut *tx, Counter::FailedDownloads, 1.0).await?;
        tx.commit().await?;

        Ok(())
    }

    // ==================== Rollups ====================

    /// Aggregates download records for a site.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn site_rollup(&self, site: &str) -> Result<SiteRollup> {
        let rollup = sqlx::query_as::<_, SiteRollup>(&format!(
            "SELECT {ROLLUP_COLUMNS} FROM downloads WHERE site_name = ?"
        ))
        .bind(site)
        .fetch_one(self.db.pool())
        .await?;
        Ok(rollup)
    }

    /// Aggregates download records for one library of a site.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn library_rollup(&self, site: &str, library: &str) -> Result<SiteRollup> {
        let rollup = sqlx::query_as::<_, SiteRollup>(&format!(
            "SELECT {ROLLUP_COLUMNS} FROM downloads WHERE site_name = ? AND library_name = ?"
        ))
        .bind(site)
        .bind(library)
        .fetch_one(self.db.pool())
        .await?;
        Ok(rollup)
    }

    /// Counts files of one site+library currently marked `downloading`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_downloading(&self, site: &str, library: &str) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) AS count FROM downloads
              WHERE status = ? AND site_name = ? AND library_name = ?",
        )
        .bind(FileStatus::Downloading.as_str())
        .bind(site)
        .bind(library)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("count"))
    }

    // ==================== Sites ====================

    /// Marks a site `processing` and stamps `started_at`, creating its row if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self))]
    pub async fn begin_site(&self, site: &str, url: &str) -> Result<()> {
        sqlx::query(
            r"INSERT INTO sites (site_name, site_url, status, started_at, last_updated)
              VALUES (?, ?, ?, datetime('now'), datetime('now'))
              ON CONFLICT(site_name) DO UPDATE SET
                  site_url = excluded.site_url,
                  status = excluded.status,
                  started_at = excluded.started_at,
                  last_updated = excluded.last_updated",
        )
        .bind(site)
        .bind(url)
        .bind(SiteStatus::Processing.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Recomputes a site's rollup and persists the derived status.
    ///
    /// The status is a pure function of the download records (see
    /// [`SiteStatus::from_rollup`]); `completed_at` is stamped when it is finished.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query or write fails.
    #[instrument(skip(self))]
    pub async fn recompute_site_status(&self, site: &str) -> Result<SiteStatus> {
        let rollup = self.site_rollup(site).await?;
        let status = SiteStatus::from_rollup(&rollup);

        sqlx::query(
            r"INSERT INTO sites
                (site_name, site_url, status, total_files, completed_files, failed_files,
                 completed_at, last_updated)
              VALUES (?, '', ?, ?, ?, ?, CASE WHEN ? THEN datetime('now') END, datetime('now'))
              ON CONFLICT(site_name) DO UPDATE SET
                  status = excluded.status,
                  total_files = excluded.total_files,
                  completed_files = excluded.completed_files,
                  failed_files = excluded.failed_files,
                  completed_at = COALESCE(excluded.completed_at, sites.completed_at),
                  last_updated = excluded.last_updated",
        )
        .bind(site)
        .bind(status.as_str())
        .bind(rollup.total)
        .bind(rollup.completed)
        .bind(rollup.failed)
        .bind(status.is_finished())
        .execute(self.db.pool())
        .await?;

        debug!(
            site,
            %status,
            total = rollup.total,
            completed = rollup.completed,
            failed = rollup.failed,
            "site status recomputed"
        );
        Ok(status)
    }

    /// Gets a site record by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_site(&self, site: &str) -> Result<Option<SiteRecord>> {
        let record = sqlx::query_as::<_, SiteRecord>(r"SELECT * FROM sites WHERE site_name = ?")
            .bind(site)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(record)
    }

    /// Lists all site records, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_sites(&self) -> Result<Vec<SiteRecord>> {
        let records = sqlx::query_as::<_, SiteRecord>(
            r"SELECT * FROM sites ORDER BY last_updated DESC, site_name ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    /// Returns failed files of a site to `discovered` when they still have attempts left.
    ///
    /// Attempt counts are kept, so the next cycle only spends what remains.
    /// Returns the number of records reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_retryable_failures(&self, site: &str, max_attempts: u32) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?
              WHERE site_name = ? AND status = ? AND attempt_count < ?",
        )
        .bind(FileStatus::Discovered.as_str())
        .bind(site)
        .bind(FileStatus::Failed.as_str())
        .bind(i64::from(max_attempts))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Forgets a site's progress so the next run starts it over.
    ///
    /// Deletes the site record and returns every non-completed download record
    /// of the site to `discovered` with zero attempts. Completed records are
    /// untouched. Returns the number of download records reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    #[instrument(skip(self))]
    pub async fn reset_site(&self, site: &str) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(r"DELETE FROM sites WHERE site_name = ?")
            .bind(site)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, attempt_count = 0, error_message = NULL
              WHERE site_name = ? AND status != ?",
        )
        .bind(FileStatus::Discovered.as_str())
        .bind(site)
        .bind(FileStatus::Completed.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // ==================== Counters ====================

    /// Adds `by` to a counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn increment_counter(&self, counter: Counter, by: f64) -> Result<()> {
        bump_counter(self.db.pool(), counter, by).await
    }

    /// Reads every counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn counters(&self) -> Result<CounterSnapshot> {
        let rows = sqlx::query(r"SELECT stat_name, stat_value FROM statistics")
            .fetch_all(self.db.pool())
            .await?;

        let mut snapshot = CounterSnapshot::default();
        for row in rows {
            let name: String = row.get("stat_name");
            snapshot.set(&name, row.get("stat_value"));
        }
        Ok(snapshot)
    }

    /// Overwrites drifted counters with values aggregated from download records.
    ///
    /// `total_files`, `successful_downloads`, `failed_downloads` and
    /// `mb_downloaded` are recomputed; `skipped_existing` and `api_errors`
    /// have no source rows and are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    #[instrument(skip(self))]
    pub async fn recompute_counters(&self) -> Result<CounterSnapshot> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            r"SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN file_size_mb END), 0.0) AS mb
              FROM downloads",
        )
        .fetch_one(&mut *tx)
        .await?;

        #[allow(clippy::cast_precision_loss)]
        let values = [
            (Counter::TotalFiles, row.get::<i64, _>("total") as f64),
            (Counter::SuccessfulDownloads, row.get::<i64, _>("completed") as f64),
            (Counter::FailedDownloads, row.get::<i64, _>("failed") as f64),
            (Counter::MbDownloaded, row.get::<f64, _>("mb")),
        ];

        for (counter, value) in values {
            sqlx::query(
                r"UPDATE statistics
                  SET stat_value = ?, last_updated = datetime('now')
                  WHERE stat_name = ?",
            )
            .bind(value)
            .bind(counter.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.counters().await
    }

    // ==================== Reporting ====================

    /// Counts download records per status across all sites.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r"SELECT status, COUNT(*) AS count FROM downloads GROUP BY status ORDER BY status",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("count")))
            .collect())
    }

    /// Counts download records in one status across all sites.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_by_status(&self, status: FileStatus) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM downloads WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("count"))
    }

    /// Lists failed files whose attempts reached `min_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn exhausted_failures(&self, min_attempts: u32, limit: i64) -> Result<Vec<FailedFile>> {
        let rows = sqlx::query_as::<_, FailedFile>(
            r"SELECT file_path, site_name, attempt_count, error_message, last_attempt
              FROM downloads
              WHERE status = ? AND attempt_count >= ?
              ORDER BY last_attempt DESC, file_path ASC
              LIMIT ?",
        )
        .bind(FileStatus::Failed.as_str())
        .bind(i64::from(min_attempts))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Lists failures recorded within the last `minutes`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn recent_failures(&self, minutes: u32, limit: i64) -> Result<Vec<FailedFile>> {
        let rows = sqlx::query_as::<_, FailedFile>(
            r"SELECT file_path, site_name, attempt_count, error_message, last_attempt
              FROM downloads
              WHERE status = ? AND last_attempt > datetime('now', ?)
              ORDER BY last_attempt DESC
              LIMIT ?",
        )
        .bind(FileStatus::Failed.as_str())
        .bind(format!("-{minutes} minutes"))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Counts files completed within the last `minutes`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn completed_within(&self, minutes: u32) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) AS count FROM downloads
              WHERE status = ? AND completed_at > datetime('now', ?)",
        )
        .bind(FileStatus::Completed.as_str())
        .bind(format!("-{minutes} minutes"))
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("count"))
    }

    // ==================== Sessions ====================

    /// Opens a session row for this run and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn create_session(&self) -> Result<i64> {
        let row = sqlx::query(r"INSERT INTO sessions DEFAULT VALUES RETURNING id")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("id"))
    }

    /// Overwrites a session's running totals.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn update_session(&self, id: i64, totals: &SessionTotals) -> Result<()> {
        sqlx::query(
            r"UPDATE sessions
              SET files_processed = ?, files_downloaded = ?, files_failed = ?, mb_downloaded = ?
              WHERE id = ?",
        )
        .bind(totals.files_processed)
        .bind(totals.files_downloaded)
        .bind(totals.files_failed)
        .bind(totals.mb_downloaded)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Writes final totals and stamps `end_time`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, totals))]
    pub async fn close_session(&self, id: i64, totals: &SessionTotals) -> Result<()> {
        self.update_session(id, totals).await?;
        sqlx::query(r"UPDATE sessions SET end_time = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Returns the newest session that has not been closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn open_session(&self) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r"SELECT * FROM sessions WHERE end_time IS NULL ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    /// Gets a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(r"SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(record)
    }

    // ==================== Backups ====================

    /// Writes a consistent copy of the store to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backup`] if the snapshot cannot be written.
    pub async fn backup_to(&self, target: &Path) -> Result<()> {
        self.db
            .snapshot_to(target)
            .await
            .map_err(|e| StoreError::Backup(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn discovery(path: &str) -> NewDiscovery<'_> {
        NewDiscovery {
            path,
            site: "Engineering",
            library: "Documents",
            file_name: "a.txt",
            size_bytes: Some(2 * 1024 * 1024),
        }
    }

    #[tokio::test]
    async fn test_mark_downloading_missing_path_is_not_found() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());

        let result = store.mark_downloading("/missing").await;

        assert!(matches!(result, Err(StoreError::RecordNotFound(p)) if p == "/missing"));
    }

    #[tokio::test]
    async fn test_mark_completed_without_size_credits_known_size() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());
        store.record_discovery(&discovery("/out/a.txt")).await.unwrap();

        let credited = store.mark_completed("/out/a.txt", None).await.unwrap();

        assert!((credited - 2.0).abs() < 1e-9);
        let counters = store.counters().await.unwrap();
        assert!((counters.mb_downloaded - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mark_failed_missing_path_leaves_counter_untouched() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());

        let result = store.mark_failed("/missing", "boom").await;

        assert!(matches!(result, Err(StoreError::RecordNotFound(_))));
        let counters = store.counters().await.unwrap();
        assert!(counters.failed_downloads.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_file_state_absent_for_unknown_path() {
        let store = ProgressStore::new(Database::new_in_memory().await.unwrap());
        assert!(store.file_state("/nope").await.unwrap().is_none());
    }
}
