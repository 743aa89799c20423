//! Repository seam for per-file progress operations.
//!
//! Workers and the discovery walker depend on this trait rather than on
//! [`ProgressStore`] directly, so the per-file algorithms can be exercised
//! against the store without a full run context.

use async_trait::async_trait;

use super::{Counter, FileState, NewDiscovery, ProgressStore, Result};

/// Data-access contract for the per-file state machine.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Inserts a discovered file if absent; returns whether a record was created.
    async fn record_discovery(&self, discovery: &NewDiscovery<'_>) -> Result<bool>;

    /// Reads the status and attempt count for a path.
    async fn file_state(&self, path: &str) -> Result<Option<FileState>>;

    /// Claims one attempt; returns the new attempt count.
    async fn mark_downloading(&self, path: &str) -> Result<i64>;

    /// Marks completed and credits success counters; returns credited megabytes.
    async fn mark_completed(&self, path: &str, size_bytes: Option<u64>) -> Result<f64>;

    /// Marks failed and credits the failure counter.
    async fn mark_failed(&self, path: &str, error: &str) -> Result<()>;

    /// Adds to a global counter.
    async fn increment_counter(&self, counter: Counter, by: f64) -> Result<()>;

    /// Counts in-flight files for one site+library.
    async fn count_downloading(&self, site: &str, library: &str) -> Result<i64>;
}

#[async_trait]
impl ProgressRepository for ProgressStore {
    async fn record_discovery(&self, discovery: &NewDiscovery<'_>) -> Result<bool> {
        ProgressStore::record_discovery(self, discovery).await
    }

    async fn file_state(&self, path: &str) -> Result<Option<FileState>> {
        ProgressStore::file_state(self, path).await
    }

    async fn mark_downloading(&self, path: &str) -> Result<i64> {
        ProgressStore::mark_downloading(self, path).await
    }

    async fn mark_completed(&self, path: &str, size_bytes: Option<u64>) -> Result<f64> {
        ProgressStore::mark_completed(self, path, size_bytes).await
    }

    async fn mark_failed(&self, path: &str, error: &str) -> Result<()> {
        ProgressStore::mark_failed(self, path, error).await
    }

    async fn increment_counter(&self, counter: Counter, by: f64) -> Result<()> {
        ProgressStore::increment_counter(self, counter, by).await
    }

    async fn count_downloading(&self, site: &str, library: &str) -> Result<i64> {
        ProgressStore::count_downloading(self, site, library).await
    }
}
