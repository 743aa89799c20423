//! Run-wide state shared by the orchestrator and every worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tracing::warn;

use super::RetryPolicy;
use crate::lifecycle::Lifecycle;
use crate::provider::ContentProvider;
use crate::store::{ProgressStore, SessionTotals};

/// Default bounded wait for one dequeue.
pub const DEFAULT_DEQUEUE_WAIT: Duration = Duration::from_secs(30);

/// Default interval between drain polls of the store.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_secs(5);

/// Default cap on waiting for zero in-flight downloads after the queue empties.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wait for each worker to stop after its shutdown message.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of processed files between session row updates.
pub const DEFAULT_SESSION_FLUSH_EVERY: i64 = 10;

/// Timing knobs of the worker pool.
#[derive(Debug, Clone)]
pub struct PoolTimings {
    /// Bounded wait for one dequeue before the idle check runs.
    pub dequeue_wait: Duration,
    /// Interval between checks that the in-memory queue is empty.
    pub queue_poll: Duration,
    /// Interval between store polls for in-flight downloads.
    pub drain_poll: Duration,
    /// Cap on the in-flight poll.
    pub drain_timeout: Duration,
    /// Wait for each worker after shutdown messages are sent.
    pub join_timeout: Duration,
    /// Wait between enqueue retries while the queue is full.
    pub enqueue_wait: Duration,
    /// Processed files between session row updates.
    pub session_flush_every: i64,
}

impl Default for PoolTimings {
    fn default() -> Self {
        Self {
            dequeue_wait: DEFAULT_DEQUEUE_WAIT,
            queue_poll: Duration::from_millis(500),
            drain_poll: DEFAULT_DRAIN_POLL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            enqueue_wait: Duration::from_secs(1),
            session_flush_every: DEFAULT_SESSION_FLUSH_EVERY,
        }
    }
}

/// Running session totals, updated lock-free by workers.
#[derive(Debug, Default)]
pub struct SessionTally {
    processed: AtomicI64,
    downloaded: AtomicI64,
    failed: AtomicI64,
    mb_bits: AtomicU64,
}

impl SessionTally {
    /// Counts a completed file. Returns the processed total.
    pub fn record_completed(&self, mb: f64) -> i64 {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
        self.add_mb(mb);
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Counts a failed file. Returns the processed total.
    pub fn record_failed(&self) -> i64 {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot of the totals.
    #[must_use]
    pub fn totals(&self) -> SessionTotals {
        SessionTotals {
            files_processed: self.processed.load(Ordering::SeqCst),
            files_downloaded: self.downloaded.load(Ordering::SeqCst),
            files_failed: self.failed.load(Ordering::SeqCst),
            mb_downloaded: f64::from_bits(self.mb_bits.load(Ordering::SeqCst)),
        }
    }

    fn add_mb(&self, mb: f64) {
        // fetch_update only fails when the closure returns None.
        let _ = self
            .mb_bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + mb).to_bits())
            });
    }
}

/// Everything a worker needs, shared behind an `Arc` for one run.
pub struct RunContext {
    /// Progress store.
    pub store: ProgressStore,
    /// Remote content capability.
    pub provider: Arc<dyn ContentProvider>,
    /// Credential and backup gates.
    pub lifecycle: Arc<Lifecycle>,
    /// Per-file retry limits.
    pub retry: RetryPolicy,
    /// Pool timing knobs.
    pub timings: PoolTimings,
    /// Items per listing page.
    pub page_size: u32,
    /// Session totals for this run.
    pub session: SessionTally,
    session_id: Option<i64>,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("retry", &self.retry)
            .field("timings", &self.timings)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a context with default timings and no session.
    #[must_use]
    pub fn new(
        store: ProgressStore,
        provider: Arc<dyn ContentProvider>,
        lifecycle: Arc<Lifecycle>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            lifecycle,
            retry,
            timings: PoolTimings::default(),
            page_size: 100,
            session: SessionTally::default(),
            session_id: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the pool timings.
    #[must_use]
    pub fn with_timings(mut self, timings: PoolTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Sets the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Attaches the session row that receives running totals.
    #[must_use]
    pub fn with_session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Shares an externally owned interrupt flag (set by the signal handler).
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Returns true once the run has been interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Requests that the run stop taking new work.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Session row id, when one was attached.
    #[must_use]
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    /// Writes the running totals to the session row. Errors are logged.
    pub async fn flush_session(&self) {
        let Some(id) = self.session_id else {
            return;
        };
        if let Err(e) = self.store.update_session(id, &self.session.totals()).await {
            warn!(session_id = id, error = %e, "failed to update session totals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tally_accumulates() {
        let tally = SessionTally::default();
        assert_eq!(tally.record_completed(1.5), 1);
        assert_eq!(tally.record_completed(0.5), 2);
        assert_eq!(tally.record_failed(), 3);

        let totals = tally.totals();
        assert_eq!(totals.files_processed, 3);
        assert_eq!(totals.files_downloaded, 2);
        assert_eq!(totals.files_failed, 1);
        assert!((totals.mb_downloaded - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pool_timings_defaults() {
        let timings = PoolTimings::default();
        assert_eq!(timings.dequeue_wait, Duration::from_secs(30));
        assert_eq!(timings.drain_poll, Duration::from_secs(5));
        assert_eq!(timings.drain_timeout, Duration::from_secs(60));
        assert_eq!(timings.join_timeout, Duration::from_secs(10));
        assert_eq!(timings.session_flush_every, 10);
    }
}
