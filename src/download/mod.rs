//! Concurrent download workers for one library at a time.
//!
//! This module provides the worker pool that drains the discovery queue, the
//! per-file attempt cycle with linear backoff, and the run-wide context the
//! workers share.
//!
//! # Features
//!
//! - Bounded work queue with backpressure on discovery
//! - Idle retirement scoped to one site+library
//! - One shutdown message per worker and bounded joins
//! - Typed retry classification with a keyword fallback
//! - Dedicated failure log for files that exhaust their attempts
//!
//! # Example
//!
//! ```ignore
//! use sharepoint_backup::download::{RunContext, WorkerPool};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(RunContext::new(store, provider, lifecycle, retry));
//! let pool = WorkerPool::spawn(Arc::clone(&ctx), "Engineering", "Documents", 5, 2000);
//! let sender = pool.sender();
//! // walker enqueues through `sender`
//! pool.finish_discovery();
//! let report = pool.drain_and_shutdown().await;
//! ```

mod context;
mod failure_log;
mod retry;
mod worker;

pub use context::{
    DEFAULT_DEQUEUE_WAIT, DEFAULT_DRAIN_POLL, DEFAULT_DRAIN_TIMEOUT, DEFAULT_JOIN_TIMEOUT,
    DEFAULT_SESSION_FLUSH_EVERY, PoolTimings, RunContext, SessionTally,
};
pub use failure_log::{
    FAILED_FILES_TARGET, FAILURE_LOG_PREFIX, create_failed_files_log, failed_files_layer,
    record_failure,
};
pub use retry::{
    DEFAULT_API_RETRY_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, FailureType,
    RetryDecision, RetryPolicy, classify_error,
};
pub use worker::{
    EnqueueError, FileOutcome, PoolReport, WorkItem, WorkMessage, WorkSender, WorkerPool,
    WorkerSummary, process_file,
};
