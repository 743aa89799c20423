//! Discovery walker: mirrors a library's folder tree and feeds the work queue.
//!
//! Folders are visited depth-first from an explicit stack, so deep trees never
//! grow the call stack. Every page of a folder is read before the next folder
//! is visited, and a folder's local directory exists before any of its files
//! is enqueued. A subfolder whose listing keeps failing is logged and skipped;
//! only a failing library root ends the walk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    EnqueueError, RetryDecision, RunContext, WorkItem, WorkSender, classify_error,
};
use crate::provider::{FolderRef, ItemPage, Library, ProviderError, RemoteItem};
use crate::store::{FileStatus, NewDiscovery, ProgressRepository, StoreError};

/// Errors that end a library walk.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A folder listing failed after retries.
    #[error("listing folder {folder} failed: {source}")]
    Listing {
        /// Folder id.
        folder: String,
        /// Final provider error.
        #[source]
        source: ProviderError,
    },

    /// A progress write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A local directory could not be created.
    #[error("IO error creating {path}: {source}")]
    Io {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The work queue stopped accepting items.
    #[error("enqueue failed: {0}")]
    Enqueue(#[from] EnqueueError),
}

/// Counts from one library walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Folders listed, including the root.
    pub folders: u64,
    /// Files seen in listings.
    pub files_seen: u64,
    /// Files recorded for the first time.
    pub recorded: u64,
    /// Files handed to the worker pool.
    pub enqueued: u64,
    /// Files skipped because they were already completed.
    pub skipped_completed: u64,
    /// Subfolders skipped because their listing failed after retries.
    pub folders_failed: u64,
    /// Files skipped because another item already maps to the same local path.
    pub name_collisions: u64,
}

/// Local folder name for a site: alphanumerics, spaces and `-` survive,
/// everything else becomes `_`.
#[must_use]
pub fn sanitize_site_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Makes a remote item or library name safe as a single path component.
#[must_use]
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Walks one library and enqueues every file that is not yet completed.
#[derive(Debug)]
pub struct DiscoveryWalker<'a, R> {
    ctx: &'a RunContext,
    repo: &'a R,
    site: &'a str,
    library: &'a Library,
}

impl<'a, R: ProgressRepository> DiscoveryWalker<'a, R> {
    /// Creates a walker for `library` of `site`.
    pub fn new(ctx: &'a RunContext, repo: &'a R, site: &'a str, library: &'a Library) -> Self {
        Self {
            ctx,
            repo,
            site,
            library,
        }
    }

    /// Walks the library tree rooted at `local_root`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the library root cannot be listed after
    /// retries, a progress write fails, a directory cannot be created, or the
    /// queue stops.
    #[instrument(skip(self, local_root, sender), fields(site = self.site, library = %self.library.name))]
    pub async fn walk(
        &self,
        local_root: &Path,
        sender: &WorkSender,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();
        let mut pending = vec![(self.library.root_folder(), local_root.to_path_buf(), true)];

        while let Some((folder, dir, is_root)) = pending.pop() {
            if self.ctx.is_interrupted() {
                return Err(EnqueueError::Interrupted.into());
            }

            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| DiscoveryError::Io {
                    path: dir.clone(),
                    source,
                })?;
            report.folders += 1;

            let mut token: Option<String> = None;
            loop {
                let page = match self.list_page(&folder, token.as_deref()).await {
                    Ok(page) => page,
                    Err(error @ DiscoveryError::Listing { .. }) if !is_root => {
                        warn!(folder = %folder.id, path = %dir.display(), error = %error, "skipping folder");
                        report.folders_failed += 1;
                        break;
                    }
                    Err(error) => return Err(error),
                };
                for item in page.items {
                    if let Some(child) = item.as_folder() {
                        pending.push((child, dir.join(sanitize_component(&item.name)), false));
                    } else {
                        self.visit_file(item, &dir, sender, &mut seen, &mut report)
                            .await?;
                    }
                }

                match page.next {
                    Some(next) if token.as_deref() == Some(next.as_str()) => {
                        warn!(folder = %folder.id, "listing repeated its page token; stopping");
                        break;
                    }
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        }

        info!(
            folders = report.folders,
            folders_failed = report.folders_failed,
            files = report.files_seen,
            recorded = report.recorded,
            enqueued = report.enqueued,
            skipped_completed = report.skipped_completed,
            name_collisions = report.name_collisions,
            "library discovery finished"
        );
        Ok(report)
    }

    async fn visit_file(
        &self,
        item: RemoteItem,
        dir: &Path,
        sender: &WorkSender,
        seen: &mut HashSet<String>,
        report: &mut DiscoveryReport,
    ) -> Result<(), DiscoveryError> {
        let local_path = dir.join(sanitize_component(&item.name));
        let key = local_path.to_string_lossy().into_owned();
        report.files_seen += 1;

        if !seen.insert(key.clone()) {
            warn!(
                item = %item.id,
                name = %item.name,
                path = %key,
                "another item already maps to this local path; skipping"
            );
            report.name_collisions += 1;
            return Ok(());
        }

        match self.repo.file_state(&key).await? {
            Some(state) if state.status == FileStatus::Completed => {
                report.skipped_completed += 1;
                return Ok(());
            }
            Some(_) => {}
            None => {
                let inserted = self
                    .repo
                    .record_discovery(&NewDiscovery {
                        path: &key,
                        site: self.site,
                        library: &self.library.name,
                        file_name: &item.name,
                        size_bytes: item.size_bytes,
                    })
                    .await?;
                if inserted {
                    report.recorded += 1;
                }
            }
        }

        sender
            .enqueue(WorkItem {
                item,
                local_path,
                site: self.site.to_string(),
                library: self.library.name.clone(),
            })
            .await?;
        report.enqueued += 1;
        Ok(())
    }

    /// Reads one listing page, retrying with the file retry policy.
    async fn list_page(
        &self,
        folder: &FolderRef,
        token: Option<&str>,
    ) -> Result<ItemPage, DiscoveryError> {
        let mut attempt = 1;
        loop {
            let credential = self.ctx.lifecycle.credential().current().await;
            let error = match self
                .ctx
                .provider
                .list_items(&credential, folder, self.ctx.page_size, token)
                .await
            {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match self.ctx.retry.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        folder = %folder.id,
                        attempt,
                        error = %error,
                        "listing failed; retrying"
                    );
                    if failure_type.wants_credential_refresh() {
                        self.ctx.lifecycle.force_refresh(&credential).await;
                    }
                    tokio::time::sleep(error.retry_after().map_or(delay, |s| s.max(delay))).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "listing not retried");
                    return Err(DiscoveryError::Listing {
                        folder: folder.id.clone(),
                        source: error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_site_name() {
        assert_eq!(sanitize_site_name("Engineering"), "Engineering");
        assert_eq!(sanitize_site_name("R&D / Labs"), "R_D _ Labs");
        assert_eq!(sanitize_site_name("Team-Site 2"), "Team-Site 2");
        assert_eq!(sanitize_site_name("a.b"), "a_b");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Shared Documents"), "Shared Documents");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("report.v2.docx"), "report.v2.docx");
    }
}
