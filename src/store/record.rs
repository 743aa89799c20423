//! Record types persisted by the progress store.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Bytes per megabyte used for every size column.
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Converts a byte count to megabytes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Status of a single file's download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Seen during discovery, not yet attempted in the current cycle.
    Discovered,
    /// A worker has claimed the file and is attempting it.
    Downloading,
    /// Downloaded (or found locally with a matching size).
    Completed,
    /// The attempt cycle ended without success.
    Failed,
}

impl FileStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid file status: {s}")),
        }
    }
}

/// Current status and attempt count of one file, as read by workers and the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    /// Current status.
    pub status: FileStatus,
    /// Download attempts recorded so far.
    pub attempt_count: i64,
}

/// One row of the `downloads` table.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Surrogate key.
    pub id: i64,
    /// Local destination path (unique).
    pub file_path: String,
    /// Owning site name.
    pub site_name: String,
    /// Owning library name.
    pub library_name: String,
    /// Remote file name.
    pub file_name: String,
    /// Size in megabytes, once known.
    pub file_size_mb: Option<f64>,
    /// Status stored as text, parsed via `status()`.
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Download attempts recorded so far.
    pub attempt_count: i64,
    /// When the last attempt started or failed.
    pub last_attempt: Option<String>,
    /// When the file reached `completed`.
    pub completed_at: Option<String>,
    /// Last error text, cleared on completion.
    pub error_message: Option<String>,
    /// When the record was first discovered.
    pub created_at: String,
}

impl DownloadRecord {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Discovered` if the status string is invalid, so an
    /// unreadable row is retried rather than skipped.
    #[must_use]
    pub fn status(&self) -> FileStatus {
        self.status_str.parse().unwrap_or(FileStatus::Discovered)
    }
}

/// Site-level status, derived from the aggregate of its download records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Listed but not yet processed.
    Pending,
    /// Files are still outstanding.
    Processing,
    /// Every file completed.
    Completed,
    /// Every file reached a terminal state and at least one failed.
    CompletedWithErrors,
    /// The site has no files.
    Empty,
}

impl SiteStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Empty => "empty",
        }
    }

    /// Derives the status from a rollup.
    ///
    /// This is the only way a site status other than `pending`/`processing`
    /// is ever produced.
    #[must_use]
    pub fn from_rollup(rollup: &SiteRollup) -> Self {
        if rollup.total == 0 {
            Self::Empty
        } else if rollup.completed == rollup.total {
            Self::Completed
        } else if rollup.failed > 0 && rollup.completed + rollup.failed == rollup.total {
            Self::CompletedWithErrors
        } else {
            Self::Processing
        }
    }

    /// Returns true for statuses that end a site pass.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Empty
        )
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "empty" => Ok(Self::Empty),
            _ => Err(format!("invalid site status: {s}")),
        }
    }
}

/// Aggregate counts of download records for a site (or a site+library).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct SiteRollup {
    /// All records.
    pub total: i64,
    /// Records with status `completed`.
    pub completed: i64,
    /// Records with status `failed`.
    pub failed: i64,
    /// Records with status `discovered`.
    pub discovered: i64,
    /// Records with status `downloading`.
    pub downloading: i64,
}

impl SiteRollup {
    /// Returns true when there is at least one record and all are completed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// One row of the `sites` table.
#[derive(Debug, Clone, FromRow)]
pub struct SiteRecord {
    /// Surrogate key.
    pub id: i64,
    /// Site display name (unique).
    pub site_name: String,
    /// Source URL.
    pub site_url: String,
    /// Status stored as text, parsed via `status()`.
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Denormalized count of all records.
    pub total_files: i64,
    /// Denormalized count of completed records.
    pub completed_files: i64,
    /// Denormalized count of failed records.
    pub failed_files: i64,
    /// When the latest pass started.
    pub started_at: Option<String>,
    /// When the site last reached a finished status.
    pub completed_at: Option<String>,
    /// Last rollup write.
    pub last_updated: String,
}

impl SiteRecord {
    /// Returns the parsed status enum, falling back to `Pending`.
    #[must_use]
    pub fn status(&self) -> SiteStatus {
        self.status_str.parse().unwrap_or(SiteStatus::Pending)
    }
}

/// Named global counters in the `statistics` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Files recorded by discovery.
    TotalFiles,
    /// Files marked completed.
    SuccessfulDownloads,
    /// Files marked failed.
    FailedDownloads,
    /// Files completed by the local size match shortcut.
    SkippedExisting,
    /// Remote API/auth/throttling errors seen during attempts.
    ApiErrors,
    /// Megabytes of completed files.
    MbDownloaded,
}

impl Counter {
    /// Every counter, in display order.
    pub const ALL: [Counter; 6] = [
        Counter::TotalFiles,
        Counter::SuccessfulDownloads,
        Counter::FailedDownloads,
        Counter::SkippedExisting,
        Counter::ApiErrors,
        Counter::MbDownloaded,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalFiles => "total_files",
            Self::SuccessfulDownloads => "successful_downloads",
            Self::FailedDownloads => "failed_downloads",
            Self::SkippedExisting => "skipped_existing",
            Self::ApiErrors => "api_errors",
            Self::MbDownloaded => "mb_downloaded",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point-in-time read of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSnapshot {
    pub total_files: f64,
    pub successful_downloads: f64,
    pub failed_downloads: f64,
    pub skipped_existing: f64,
    pub api_errors: f64,
    pub mb_downloaded: f64,
}

impl CounterSnapshot {
    /// Returns the value of one counter.
    #[must_use]
    pub fn get(&self, counter: Counter) -> f64 {
        match counter {
            Counter::TotalFiles => self.total_files,
            Counter::SuccessfulDownloads => self.successful_downloads,
            Counter::FailedDownloads => self.failed_downloads,
            Counter::SkippedExisting => self.skipped_existing,
            Counter::ApiErrors => self.api_errors,
            Counter::MbDownloaded => self.mb_downloaded,
        }
    }

    pub(crate) fn set(&mut self, name: &str, value: f64) {
        match name {
            "total_files" => self.total_files = value,
            "successful_downloads" => self.successful_downloads = value,
            "failed_downloads" => self.failed_downloads = value,
            "skipped_existing" => self.skipped_existing = value,
            "api_errors" => self.api_errors = value,
            "mb_downloaded" => self.mb_downloaded = value,
            _ => {}
        }
    }
}

/// One row of the `sessions` table.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub files_processed: i64,
    pub files_downloaded: i64,
    pub files_failed: i64,
    pub mb_downloaded: f64,
}

/// Running totals written to a session row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionTotals {
    pub files_processed: i64,
    pub files_downloaded: i64,
    pub files_failed: i64,
    pub mb_downloaded: f64,
}

/// A failed file as shown in reports.
#[derive(Debug, Clone, FromRow)]
pub struct FailedFile {
    pub file_path: String,
    pub site_name: String,
    pub attempt_count: i64,
    pub error_message: Option<String>,
    pub last_attempt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollup(total: i64, completed: i64, failed: i64) -> SiteRollup {
        SiteRollup {
            total,
            completed,
            failed,
            discovered: total - completed - failed,
            downloading: 0,
        }
    }

    #[test]
    fn test_file_status_round_trips_through_str() {
        for status in [
            FileStatus::Discovered,
            FileStatus::Downloading,
            FileStatus::Completed,
            FileStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>(), Ok(status));
        }
        assert!("in_progress".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_site_status_derivation() {
        assert_eq!(SiteStatus::from_rollup(&rollup(0, 0, 0)), SiteStatus::Empty);
        assert_eq!(
            SiteStatus::from_rollup(&rollup(10, 10, 0)),
            SiteStatus::Completed
        );
        assert_eq!(
            SiteStatus::from_rollup(&rollup(10, 7, 3)),
            SiteStatus::CompletedWithErrors
        );
        assert_eq!(
            SiteStatus::from_rollup(&rollup(10, 7, 2)),
            SiteStatus::Processing
        );
        assert_eq!(
            SiteStatus::from_rollup(&rollup(10, 0, 0)),
            SiteStatus::Processing
        );
    }

    #[test]
    fn test_all_failed_is_completed_with_errors() {
        assert_eq!(
            SiteStatus::from_rollup(&rollup(4, 0, 4)),
            SiteStatus::CompletedWithErrors
        );
    }

    #[test]
    fn test_site_status_is_finished() {
        assert!(SiteStatus::Completed.is_finished());
        assert!(SiteStatus::Empty.is_finished());
        assert!(!SiteStatus::Processing.is_finished());
        assert!(!SiteStatus::Pending.is_finished());
    }

    #[test]
    fn test_bytes_to_mb() {
        assert!((bytes_to_mb(1024 * 1024) - 1.0).abs() < f64::EPSILON);
        assert!(bytes_to_mb(0).abs() < f64::EPSILON);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_counter_snapshot_set_and_get() {
        let mut snapshot = CounterSnapshot::default();
        snapshot.set("successful_downloads", 3.0);
        snapshot.set("mb_downloaded", 1.5);
        snapshot.set("unknown", 99.0);

        assert_eq!(snapshot.get(Counter::SuccessfulDownloads), 3.0);
        assert_eq!(snapshot.get(Counter::MbDownloaded), 1.5);
        assert_eq!(snapshot.get(Counter::TotalFiles), 0.0);
    }
}
