//! Worker pool draining one library's work queue, and the per-file algorithm.
//!
//! # Concurrency Model
//!
//! - One pool per library, `workers` tokio tasks sharing one bounded channel
//! - The discovery walker enqueues through [`WorkSender`]; a full queue
//!   blocks it, so discovery never runs far ahead of downloads
//! - Each dequeue is bounded by `dequeue_wait`; on timeout an idle worker
//!   retires only if discovery has finished and nothing for this site+library
//!   is still `downloading` in the store
//! - Shutdown is one [`WorkMessage::Shutdown`] per worker, sent after the
//!   queue drains and the in-flight poll settles

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::context::RunContext;
use super::failure_log::record_failure;
use super::retry::{RetryDecision, classify_error};
use crate::provider::{ProviderError, RemoteItem};
use crate::store::{Counter, FileStatus, NewDiscovery, ProgressRepository, StoreError};

/// One file to download.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Remote file.
    pub item: RemoteItem,
    /// Local destination path.
    pub local_path: std::path::PathBuf,
    /// Owning site name.
    pub site: String,
    /// Owning library name.
    pub library: String,
}

impl WorkItem {
    /// Progress store key for this file.
    #[must_use]
    pub fn key(&self) -> String {
        self.local_path.to_string_lossy().into_owned()
    }
}

/// Message carried by the work queue.
#[derive(Debug)]
pub enum WorkMessage {
    /// A file to process.
    File(Box<WorkItem>),
    /// Stop after this message; exactly one is sent per worker.
    Shutdown,
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Downloaded; carries the credited megabytes.
    Downloaded {
        /// Credited size.
        mb: f64,
    },
    /// Local copy already matched the remote size.
    SkippedExisting {
        /// Credited size.
        mb: f64,
    },
    /// Already completed before this worker saw it.
    AlreadyCompleted,
    /// Already failed with every attempt used.
    AlreadyExhausted,
    /// The attempt cycle ended in `failed`.
    Failed {
        /// Attempt count recorded in the store.
        attempts: i64,
    },
    /// The run was interrupted; the file keeps its last durable status.
    Interrupted,
}

/// Why an enqueue did not happen.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The run was interrupted.
    #[error("run interrupted")]
    Interrupted,
    /// Every worker has exited; nothing would drain the item.
    #[error("worker pool stopped")]
    PoolStopped,
}

/// Producer side of a pool's work queue.
#[derive(Debug, Clone)]
pub struct WorkSender {
    sender: mpsc::Sender<WorkMessage>,
    pending: Arc<AtomicUsize>,
    ctx: Arc<RunContext>,
}

impl WorkSender {
    /// Enqueues a file, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Interrupted`] once the run is interrupted, or
    /// [`EnqueueError::PoolStopped`] if every worker has exited.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        use tokio::sync::mpsc::error::SendTimeoutError;

        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut message = WorkMessage::File(Box::new(item));
        loop {
            if self.ctx.is_interrupted() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(EnqueueError::Interrupted);
            }
            match self
                .sender
                .send_timeout(message, self.ctx.timings.enqueue_wait)
                .await
            {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Closed(_)) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    return Err(EnqueueError::PoolStopped);
                }
            }
        }
    }
}

/// What a worker did before exiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSummary {
    /// Work items handled.
    pub handled: u64,
    /// True when the worker left through the idle check.
    pub retired_idle: bool,
}

/// Result of draining and stopping a pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolReport {
    /// Workers spawned.
    pub workers: usize,
    /// Work items handled across workers that stopped in time.
    pub handled: u64,
    /// Workers that retired through the idle check.
    pub retired_idle: usize,
    /// Workers still running after the join timeout.
    pub timed_out: usize,
    /// Workers that panicked.
    pub panicked: usize,
}

/// A fixed set of workers for one site+library.
#[derive(Debug)]
pub struct WorkerPool {
    site: String,
    library: String,
    sender: mpsc::Sender<WorkMessage>,
    handles: Vec<JoinHandle<WorkerSummary>>,
    discovery_done: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    ctx: Arc<RunContext>,
}

impl WorkerPool {
    /// Spawns `workers` tasks over a queue holding up to `capacity` messages.
    #[must_use]
    pub fn spawn(
        ctx: Arc<RunContext>,
        site: &str,
        library: &str,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let discovery_done = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    site: site.to_string(),
                    library: library.to_string(),
                    receiver: Arc::clone(&receiver),
                    discovery_done: Arc::clone(&discovery_done),
                    pending: Arc::clone(&pending),
                    ctx: Arc::clone(&ctx),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(site, library, workers, capacity, "worker pool started");

        Self {
            site: site.to_string(),
            library: library.to_string(),
            sender,
            handles,
            discovery_done,
            pending,
            ctx,
        }
    }

    /// Returns a producer handle for the discovery walker.
    #[must_use]
    pub fn sender(&self) -> WorkSender {
        WorkSender {
            sender: self.sender.clone(),
            pending: Arc::clone(&self.pending),
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Tells idle workers that no more items will be enqueued.
    pub fn finish_discovery(&self) {
        self.discovery_done.store(true, Ordering::SeqCst);
    }

    /// Waits for the queue to drain, then stops and joins every worker.
    ///
    /// 1. Wait until every enqueued item has been handled.
    /// 2. Poll the store until no file of this site+library is `downloading`,
    ///    up to `drain_timeout`.
    /// 3. Send one shutdown message per worker and join each with `join_timeout`.
    ///    A worker that does not stop in time is logged and left running.
    #[instrument(skip(self), fields(site = %self.site, library = %self.library))]
    pub async fn drain_and_shutdown(self) -> PoolReport {
        self.finish_discovery();
        let timings = &self.ctx.timings;

        while self.pending.load(Ordering::SeqCst) > 0 {
            if self.ctx.is_interrupted() {
                debug!("interrupted while draining queue");
                break;
            }
            if self.handles.iter().all(JoinHandle::is_finished) {
                warn!(
                    pending = self.pending.load(Ordering::SeqCst),
                    "all workers exited with items still queued"
                );
                break;
            }
            tokio::time::sleep(timings.queue_poll).await;
        }

        self.wait_for_in_flight().await;

        let mut report = PoolReport {
            workers: self.handles.len(),
            ..PoolReport::default()
        };

        for _ in 0..self.handles.len() {
            match timeout(timings.join_timeout, self.sender.send(WorkMessage::Shutdown)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!("timed out sending shutdown message");
                    break;
                }
            }
        }
        drop(self.sender);

        for (index, handle) in self.handles.into_iter().enumerate() {
            match timeout(timings.join_timeout, handle).await {
                Ok(Ok(summary)) => {
                    report.handled += summary.handled;
                    if summary.retired_idle {
                        report.retired_idle += 1;
                    }
                }
                Ok(Err(join_error)) => {
                    error!(worker = index, error = %join_error, "worker task failed");
                    report.panicked += 1;
                }
                Err(_) => {
                    warn!(
                        worker = index,
                        "worker did not stop within join timeout; leaving it running"
                    );
                    report.timed_out += 1;
                }
            }
        }

        info!(
            handled = report.handled,
            retired_idle = report.retired_idle,
            timed_out = report.timed_out,
            "worker pool stopped"
        );
        report
    }

    async fn wait_for_in_flight(&self) {
        let timings = &self.ctx.timings;
        let deadline = Instant::now() + timings.drain_timeout;

        loop {
            match self
                .ctx
                .store
                .count_downloading(&self.site, &self.library)
                .await
            {
                Ok(0) => return,
                Ok(in_flight) => {
                    if Instant::now() >= deadline || self.ctx.is_interrupted() {
                        warn!(in_flight, "files still downloading after drain wait");
                        return;
                    }
                    debug!(in_flight, "waiting for in-flight downloads");
                }
                Err(e) => {
                    warn!(error = %e, "could not poll in-flight downloads");
                    return;
                }
            }
            tokio::time::sleep(timings.drain_poll).await;
        }
    }
}

struct Worker {
    index: usize,
    site: String,
    library: String,
    receiver: Arc<Mutex<mpsc::Receiver<WorkMessage>>>,
    discovery_done: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    ctx: Arc<RunContext>,
}

impl Worker {
    async fn run(self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let wait = self.ctx.timings.dequeue_wait;

        loop {
            if self.ctx.is_interrupted() {
                debug!(worker = self.index, "interrupted; stopping");
                break;
            }

            let next = timeout(wait, async { self.receiver.lock().await.recv().await }).await;
            match next {
                Ok(Some(WorkMessage::File(item))) => {
                    self.handle(&item).await;
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    summary.handled += 1;
                }
                Ok(Some(WorkMessage::Shutdown) | None) => break,
                Err(_) => {
                    if self.should_retire().await {
                        debug!(worker = self.index, "idle with nothing in flight; retiring");
                        summary.retired_idle = true;
                        break;
                    }
                }
            }
        }

        self.ctx.flush_session().await;
        summary
    }

    async fn should_retire(&self) -> bool {
        if !self.discovery_done.load(Ordering::SeqCst) {
            return false;
        }
        match self
            .ctx
            .store
            .count_downloading(&self.site, &self.library)
            .await
        {
            Ok(in_flight) => in_flight == 0,
            Err(e) => {
                warn!(worker = self.index, error = %e, "idle check failed");
                false
            }
        }
    }

    async fn handle(&self, item: &WorkItem) {
        let outcome = match process_file(&self.ctx, &self.ctx.store, item).await {
            Ok(outcome) => outcome,
            Err(e) => self.recover_from_store_error(item, &e).await,
        };

        let processed = match outcome {
            FileOutcome::Downloaded { mb } | FileOutcome::SkippedExisting { mb } => {
                Some(self.ctx.session.record_completed(mb))
            }
            FileOutcome::Failed { .. } => Some(self.ctx.session.record_failed()),
            FileOutcome::AlreadyCompleted
            | FileOutcome::AlreadyExhausted
            | FileOutcome::Interrupted => None,
        };

        if let Some(processed) = processed
            && processed % self.ctx.timings.session_flush_every.max(1) == 0
        {
            self.ctx.flush_session().await;
        }

        if outcome != FileOutcome::Interrupted {
            self.ctx.lifecycle.on_file_processed().await;
        }
    }

    async fn recover_from_store_error(&self, item: &WorkItem, error: &StoreError) -> FileOutcome {
        let key = item.key();
        error!(worker = self.index, path = %key, error = %error, "store error while processing file");

        if error.is_unavailable() {
            return FileOutcome::Interrupted;
        }

        match self
            .ctx
            .store
            .mark_failed(&key, &format!("store error: {error}"))
            .await
        {
            Ok(()) => FileOutcome::Failed { attempts: 0 },
            Err(e) => {
                error!(path = %key, error = %e, "could not record failure; file stays resumable");
                FileOutcome::Interrupted
            }
        }
    }
}

/// Runs one file through its attempt cycle.
///
/// 1. Skip files already `completed`, and `failed` files with every attempt used.
/// 2. If the local file exists with the remote's reported (nonzero) size, mark
///    it completed and count it as skipped; no download happens.
/// 3. Until `max_attempts` attempts are recorded (counting those of earlier
///    runs): mark `downloading`, call the provider, then either mark
///    `completed` or classify the error and back off. The last failed attempt
///    marks `failed` and writes the failure log. A file whose earlier runs
///    already used every attempt is marked `failed` without a call.
///
/// Exactly one terminal status write happens per cycle unless the run is
/// interrupted, in which case the file stays `downloading` and is resumable.
///
/// # Errors
///
/// Returns [`StoreError`] if a progress write fails.
#[instrument(skip(ctx, repo, work), fields(path = %work.local_path.display()))]
pub async fn process_file(
    ctx: &RunContext,
    repo: &impl ProgressRepository,
    work: &WorkItem,
) -> Result<FileOutcome, StoreError> {
    let key = work.key();
    let max_attempts = ctx.retry.max_attempts();

    let prior_attempts = match repo.file_state(&key).await? {
        Some(state) if state.status == FileStatus::Completed => {
            return Ok(FileOutcome::AlreadyCompleted);
        }
        Some(state)
            if state.status == FileStatus::Failed
                && state.attempt_count >= i64::from(max_attempts) =>
        {
            return Ok(FileOutcome::AlreadyExhausted);
        }
        Some(state) => state.attempt_count,
        None => {
            repo.record_discovery(&NewDiscovery {
                path: &key,
                site: &work.site,
                library: &work.library,
                file_name: &work.item.name,
                size_bytes: work.item.size_bytes,
            })
            .await?;
            0
        }
    };

    if let Some(remote_size) = work.item.size_bytes.filter(|size| *size > 0)
        && let Ok(meta) = tokio::fs::metadata(&work.local_path).await
        && meta.is_file()
        && meta.len() == remote_size
    {
        let mb = repo.mark_completed(&key, Some(remote_size)).await?;
        repo.increment_counter(Counter::SkippedExisting, 1.0).await?;
        debug!(bytes = remote_size, "local copy matches remote size; skipped");
        return Ok(FileOutcome::SkippedExisting { mb });
    }

    let (dir, file_name) = match split_destination(&work.local_path) {
        Ok(parts) => parts,
        Err(error) => return fail_file(repo, &key, prior_attempts, &error).await,
    };
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        let error = ProviderError::io(dir, e);
        return fail_file(repo, &key, prior_attempts, &error).await;
    }

    // Attempts made by earlier runs count against the limit.
    if prior_attempts >= i64::from(max_attempts) {
        let error = ProviderError::permanent(format!(
            "attempt limit of {max_attempts} used by earlier runs"
        ));
        return fail_file(repo, &key, prior_attempts, &error).await;
    }
    let mut attempt = u32::try_from(prior_attempts).unwrap_or(0) + 1;
    loop {
        if ctx.is_interrupted() {
            return Ok(FileOutcome::Interrupted);
        }

        let attempts = repo.mark_downloading(&key).await?;
        let credential = ctx.lifecycle.credential().current().await;

        let error = match ctx
            .provider
            .download(&credential, &work.item, dir, file_name)
            .await
        {
            Ok(()) => {
                let size = tokio::fs::metadata(&work.local_path)
                    .await
                    .map(|m| m.len())
                    .ok()
                    .or(work.item.size_bytes);
                let mb = repo.mark_completed(&key, size).await?;
                info!(attempt, mb, "download complete");
                return Ok(FileOutcome::Downloaded { mb });
            }
            Err(error) => error,
        };

        let failure_type = classify_error(&error);
        if failure_type.counts_as_api_error() {
            repo.increment_counter(Counter::ApiErrors, 1.0).await?;
        }

        match ctx.retry.should_retry(failure_type, attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                let delay = error.retry_after().map_or(delay, |server| server.max(delay));
                warn!(
                    attempt,
                    ?failure_type,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "download attempt failed; retrying"
                );
                if failure_type.wants_credential_refresh() {
                    let outcome = ctx.lifecycle.force_refresh(&credential).await;
                    debug!(?outcome, "credential renewal before retry");
                }
                sleep_unless_interrupted(ctx, delay).await;
                attempt = next;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying");
                return fail_file(repo, &key, attempts, &error).await;
            }
        }
    }
}

async fn fail_file(
    repo: &impl ProgressRepository,
    key: &str,
    attempts: i64,
    error: &ProviderError,
) -> Result<FileOutcome, StoreError> {
    let message = error.to_string();
    repo.mark_failed(key, &message).await?;
    record_failure(key, attempts, &message);
    Ok(FileOutcome::Failed { attempts })
}

fn split_destination(path: &Path) -> Result<(&Path, &str), ProviderError> {
    let dir = path.parent();
    let name = path.file_name().and_then(|n| n.to_str());
    match (dir, name) {
        (Some(dir), Some(name)) => Ok((dir, name)),
        _ => Err(ProviderError::permanent(format!(
            "invalid destination path {}",
            path.display()
        ))),
    }
}

/// Sleeps for `delay`, waking early if the run is interrupted.
async fn sleep_unless_interrupted(ctx: &RunContext, delay: Duration) {
    const SLICE: Duration = Duration::from_millis(250);
    let deadline = Instant::now() + delay;
    while !ctx.is_interrupted() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(SLICE)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_destination() {
        let path = Path::new("/out/Engineering/Documents/a.txt");
        let (dir, name) = split_destination(path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(dir, Path::new("/out/Engineering/Documents"));
        assert_eq!(name, "a.txt");

        assert!(split_destination(Path::new("/")).is_err());
    }

    #[test]
    fn test_work_item_key_is_local_path() {
        let item = WorkItem {
            item: RemoteItem {
                id: "1".to_string(),
                library_id: "d".to_string(),
                name: "a.txt".to_string(),
                size_bytes: Some(1),
                kind: crate::provider::ItemKind::File,
            },
            local_path: "/out/s/l/a.txt".into(),
            site: "s".to_string(),
            library: "l".to_string(),
        };
        assert_eq!(item.key(), "/out/s/l/a.txt");
    }
}
