//! Site orchestrator: drives discovery and the worker pool site by site.
//!
//! Sites and libraries are processed sequentially; only a library's download
//! phase fans out. Library failures are logged and skipped, site failures are
//! logged and the site status is recomputed from whatever state exists. The
//! run halts only when credentials are lost or the run is interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::discovery::{
    DiscoveryError, DiscoveryReport, DiscoveryWalker, sanitize_component, sanitize_site_name,
};
use crate::download::{PoolReport, RunContext, WorkerPool};
use crate::provider::{Library, ProviderError, SiteSpec};
use crate::report::StatisticsReport;
use crate::store::{SiteStatus, StoreError};

/// Errors from processing a site or library.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A progress read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The provider could not list the site's libraries.
    #[error("listing libraries failed: {0}")]
    Provider(#[from] ProviderError),

    /// Library discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Root of the local mirror.
    pub output_dir: PathBuf,
    /// Workers per library.
    pub workers: usize,
    /// Work queue capacity.
    pub queue_capacity: usize,
    /// Force a full re-authentication after this many sites; 0 disables.
    pub reauth_every_sites: usize,
}

impl OrchestratorSettings {
    /// Settings with 5 workers, a 2000-item queue and re-authentication every 5 sites.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            workers: 5,
            queue_capacity: 2000,
            reauth_every_sites: 5,
        }
    }
}

/// What happened to one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteDisposition {
    /// Every known file was already completed.
    AlreadyComplete,
    /// Processed; carries the final derived status.
    Processed(SiteStatus),
    /// A site-level error ended processing; carries the recomputed status.
    Failed {
        /// Error text.
        error: String,
        /// Status recomputed after the failure, when that succeeded.
        status: Option<SiteStatus>,
    },
}

/// Result of processing one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutcome {
    /// Site name.
    pub site: String,
    /// Final disposition.
    pub disposition: SiteDisposition,
    /// Libraries walked and drained.
    pub libraries_processed: usize,
    /// Libraries skipped because every known file was completed.
    pub libraries_skipped: usize,
    /// Libraries that failed and were skipped.
    pub libraries_failed: usize,
    /// Subfolders whose listing failed and were skipped.
    pub folders_failed: u64,
    /// Files skipped because another item maps to the same local path.
    pub name_collisions: u64,
}

impl SiteOutcome {
    fn new(site: &str, disposition: SiteDisposition) -> Self {
        Self {
            site: site.to_string(),
            disposition,
            libraries_processed: 0,
            libraries_skipped: 0,
            libraries_failed: 0,
            folders_failed: 0,
            name_collisions: 0,
        }
    }
}

/// Result of a full run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Outcomes for every site that was started.
    pub sites: Vec<SiteOutcome>,
    /// Set when the run stopped early because credentials were lost.
    pub halted: Option<String>,
    /// True when the run was interrupted.
    pub interrupted: bool,
    /// Final store backup, when it was written.
    pub final_backup: Option<PathBuf>,
}

/// Processes configured sites one after another.
#[derive(Debug)]
pub struct Orchestrator {
    ctx: Arc<RunContext>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Creates an orchestrator over a run context.
    #[must_use]
    pub fn new(ctx: Arc<RunContext>, settings: OrchestratorSettings) -> Self {
        Self { ctx, settings }
    }

    /// Shared run context.
    #[must_use]
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Processes every site, then writes a final store backup.
    ///
    /// Never fails as a whole: per-site errors are recorded in the summary.
    #[instrument(skip(self, sites), fields(sites = sites.len()))]
    pub async fn run(&self, sites: &[SiteSpec]) -> RunSummary {
        let mut summary = RunSummary::default();

        for (index, site) in sites.iter().enumerate() {
            if self.ctx.is_interrupted() {
                summary.interrupted = true;
                break;
            }
            if self.ctx.lifecycle.credentials_lost() {
                summary.halted = Some("credentials lost".to_string());
                break;
            }

            let every = self.settings.reauth_every_sites;
            if every > 0 && index > 0 && index % every == 0 {
                info!(completed_sites = index, "periodic re-authentication");
                if let Err(e) = self.ctx.lifecycle.reauthenticate().await {
                    error!(error = %e, "re-authentication failed; halting run");
                    summary.halted = Some(format!("re-authentication failed: {e}"));
                    break;
                }
            }

            info!(site = %site.name, position = index + 1, total = sites.len(), "processing site");
            let outcome = match self.process_site(site).await {
                Ok(outcome) => outcome,
                Err(e) => self.recover_site(site, &e).await,
            };
            info!(site = %site.name, disposition = ?outcome.disposition, "site finished");
            summary.sites.push(outcome);

            self.log_statistics().await;
            self.ctx.lifecycle.check_token().await;
            self.ctx.lifecycle.check_backup().await;
        }

        if self.ctx.is_interrupted() {
            summary.interrupted = true;
        }
        if summary.halted.is_none() && self.ctx.lifecycle.credentials_lost() {
            summary.halted = Some("credentials lost".to_string());
        }

        match self.ctx.lifecycle.backup_now().await {
            Ok(path) => summary.final_backup = Some(path),
            Err(e) => warn!(error = %e, "final store backup failed"),
        }

        summary
    }

    /// Processes one site through its state machine.
    ///
    /// 1. Skip if every known file is completed.
    /// 2. Return retryable failures to `discovered`.
    /// 3. Mark the site `processing`.
    /// 4. Walk and drain each library, skipping libraries already complete.
    /// 5. Recompute the site status from its download records.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for site-level failures (store errors,
    /// library listing failures). Library failures are logged and skipped.
    #[instrument(skip(self, site), fields(site = %site.name))]
    pub async fn process_site(&self, site: &SiteSpec) -> Result<SiteOutcome, OrchestratorError> {
        let store = &self.ctx.store;
        let rollup = store.site_rollup(&site.name).await?;

        if rollup.all_completed() {
            info!(files = rollup.total, "all files already completed; skipping site");
            return Ok(SiteOutcome::new(&site.name, SiteDisposition::AlreadyComplete));
        }

        if rollup.failed > 0 {
            let reset = store
                .reset_retryable_failures(&site.name, self.ctx.retry.max_attempts())
                .await?;
            if reset > 0 {
                info!(reset, "returned retryable failures to discovered");
            }
        }

        store.begin_site(&site.name, &site.url).await?;
        let had_prior_records = rollup.total > 0;

        let credential = self.ctx.lifecycle.credential().current().await;
        let libraries = self.ctx.provider.list_libraries(&credential, site).await?;
        if libraries.is_empty() {
            warn!("site exposes no document libraries");
        }

        let mut outcome = SiteOutcome::new(&site.name, SiteDisposition::AlreadyComplete);
        let site_dir = self
            .settings
            .output_dir
            .join(sanitize_site_name(&site.name));

        for library in &libraries {
            if self.ctx.is_interrupted() || self.ctx.lifecycle.credentials_lost() {
                warn!("stopping site early");
                break;
            }

            if had_prior_records {
                let library_rollup = store.library_rollup(&site.name, &library.name).await?;
                if library_rollup.all_completed() {
                    info!(library = %library.name, files = library_rollup.total, "library already complete; skipping");
                    outcome.libraries_skipped += 1;
                    continue;
                }
            }

            match self.process_library(site, library, &site_dir).await {
                Ok((discovery, pool)) => {
                    info!(
                        library = %library.name,
                        enqueued = discovery.enqueued,
                        handled = pool.handled,
                        folders_failed = discovery.folders_failed,
                        "library finished"
                    );
                    outcome.libraries_processed += 1;
                    outcome.folders_failed += discovery.folders_failed;
                    outcome.name_collisions += discovery.name_collisions;
                }
                Err(e) => {
                    error!(library = %library.name, error = %e, "library failed; continuing with next library");
                    outcome.libraries_failed += 1;
                }
            }
        }

        let status = store.recompute_site_status(&site.name).await?;
        outcome.disposition = SiteDisposition::Processed(status);
        Ok(outcome)
    }

    /// Walks one library while its worker pool downloads, then drains the pool.
    async fn process_library(
        &self,
        site: &SiteSpec,
        library: &Library,
        site_dir: &std::path::Path,
    ) -> Result<(DiscoveryReport, PoolReport), OrchestratorError> {
        let local_root = site_dir.join(sanitize_component(&library.name));
        let pool = WorkerPool::spawn(
            Arc::clone(&self.ctx),
            &site.name,
            &library.name,
            self.settings.workers,
            self.settings.queue_capacity,
        );

        let walker = DiscoveryWalker::new(&self.ctx, &self.ctx.store, &site.name, library);
        let walked = walker.walk(&local_root, &pool.sender()).await;

        pool.finish_discovery();
        let pool_report = pool.drain_and_shutdown().await;

        Ok((walked?, pool_report))
    }

    async fn recover_site(&self, site: &SiteSpec, error: &OrchestratorError) -> SiteOutcome {
        error!(site = %site.name, error = %error, "site failed; continuing with next site");
        let status = match self.ctx.store.recompute_site_status(&site.name).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(site = %site.name, error = %e, "could not recompute site status");
                None
            }
        };
        SiteOutcome::new(
            &site.name,
            SiteDisposition::Failed {
                error: error.to_string(),
                status,
            },
        )
    }

    async fn log_statistics(&self) {
        match StatisticsReport::collect(&self.ctx.store, self.ctx.retry.max_attempts()).await {
            Ok(report) => info!("\n{report}"),
            Err(e) => warn!(error = %e, "could not collect statistics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_settings_defaults() {
        let settings = OrchestratorSettings::new("/backup");
        assert_eq!(settings.workers, 5);
        assert_eq!(settings.queue_capacity, 2000);
        assert_eq!(settings.reauth_every_sites, 5);
        assert_eq!(settings.output_dir, PathBuf::from("/backup"));
    }
}
