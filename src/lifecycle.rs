//! Credential and store-backup lifecycle.
//!
//! Two elapsed-time gates ride on worker throughput instead of a timer task:
//! every `trigger_every`-th processed file checks whether the credential is
//! due for a refresh and whether the progress store is due for a backup. The
//! orchestrator also checks both between sites.
//!
//! Each gate is a `tokio::sync::Mutex<Instant>` taken with `try_lock`, so a
//! worker that finds a gate busy moves on instead of queueing behind it and
//! the same refresh or backup is never started twice.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::credential::{Credential, CredentialError, CredentialHandle, CredentialProvider};
use crate::store::{ProgressStore, StoreError};

/// Default elapsed time before the credential is refreshed (45 minutes).
pub const DEFAULT_TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(2700);

/// Default elapsed time between store backups (10 minutes).
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(600);

/// Default number of processed files between gate checks.
pub const DEFAULT_TRIGGER_EVERY: u64 = 100;

/// Default number of backups retained.
pub const DEFAULT_KEEP_BACKUPS: usize = 5;

/// Subdirectory of the output directory that holds store backups.
pub const BACKUP_DIR_NAME: &str = "db_backups";

/// File name prefix of store backups.
pub const BACKUP_PREFIX: &str = "progress_backup_";

/// Tuning for the lifecycle gates.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Elapsed time before a credential refresh is due.
    pub token_refresh_interval: Duration,
    /// Elapsed time before a store backup is due.
    pub backup_interval: Duration,
    /// Processed files between gate checks.
    pub trigger_every: u64,
    /// Backups retained after pruning.
    pub keep_backups: usize,
    /// Directory receiving backups.
    pub backup_dir: PathBuf,
}

impl LifecycleSettings {
    /// Default settings writing backups under `output_dir/db_backups`.
    #[must_use]
    pub fn new(output_dir: &Path) -> Self {
        Self {
            token_refresh_interval: DEFAULT_TOKEN_REFRESH_INTERVAL,
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            trigger_every: DEFAULT_TRIGGER_EVERY,
            keep_backups: DEFAULT_KEEP_BACKUPS,
            backup_dir: output_dir.join(BACKUP_DIR_NAME),
        }
    }
}

/// What a token gate check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutcome {
    /// The interval has not elapsed.
    NotDue,
    /// Another task holds the gate.
    Busy,
    /// Someone else already swapped in a newer credential.
    AlreadyRenewed,
    /// The credential was refreshed in place.
    Refreshed,
    /// Refresh failed and a full re-authentication succeeded.
    Reauthenticated,
    /// Both refresh and re-authentication failed.
    Lost,
}

/// Coordinates credential renewal and store backups for one run.
pub struct Lifecycle {
    settings: LifecycleSettings,
    credentials: Arc<dyn CredentialProvider>,
    handle: CredentialHandle,
    store: ProgressStore,
    last_refresh: Mutex<Instant>,
    last_backup: Mutex<Instant>,
    files_seen: Mutex<u64>,
    lost: AtomicBool,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("settings", &self.settings)
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    /// Creates a lifecycle manager around an authenticated credential handle.
    #[must_use]
    pub fn new(
        settings: LifecycleSettings,
        credentials: Arc<dyn CredentialProvider>,
        handle: CredentialHandle,
        store: ProgressStore,
    ) -> Self {
        let now = Instant::now();
        Self {
            settings,
            credentials,
            handle,
            store,
            last_refresh: Mutex::new(now),
            last_backup: Mutex::new(now),
            files_seen: Mutex::new(0),
            lost: AtomicBool::new(false),
        }
    }

    /// Shared credential handle read by workers.
    #[must_use]
    pub fn credential(&self) -> &CredentialHandle {
        &self.handle
    }

    /// Returns true once refresh and re-authentication have both failed.
    #[must_use]
    pub fn credentials_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Counts one processed file and runs both gate checks every Nth file.
    pub async fn on_file_processed(&self) {
        let due = {
            let mut seen = self.files_seen.lock().await;
            *seen += 1;
            *seen % self.settings.trigger_every.max(1) == 0
        };

        if due {
            self.check_token().await;
            self.check_backup().await;
        }
    }

    /// Refreshes the credential if the refresh interval has elapsed.
    #[instrument(skip(self))]
    pub async fn check_token(&self) -> TokenOutcome {
        let Ok(mut last) = self.last_refresh.try_lock() else {
            return TokenOutcome::Busy;
        };
        if last.elapsed() < self.settings.token_refresh_interval {
            return TokenOutcome::NotDue;
        }

        let outcome = self.renew().await;
        *last = Instant::now();
        outcome
    }

    /// Renews the credential after a request was rejected with `stale`.
    ///
    /// Waits for the gate. If another task swapped the credential while this
    /// one waited, nothing is renewed.
    #[instrument(skip(self, stale))]
    pub async fn force_refresh(&self, stale: &Credential) -> TokenOutcome {
        let mut last = self.last_refresh.lock().await;
        if self.handle.current().await != *stale {
            return TokenOutcome::AlreadyRenewed;
        }

        let outcome = self.renew().await;
        *last = Instant::now();
        outcome
    }

    /// Performs a full re-authentication and swaps the credential.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the credentials-lost flag is set first.
    #[instrument(skip(self))]
    pub async fn reauthenticate(&self) -> Result<(), CredentialError> {
        let mut last = self.last_refresh.lock().await;
        match self.credentials.reauthenticate().await {
            Ok(credential) => {
                self.handle.replace(credential).await;
                *last = Instant::now();
                info!("re-authenticated");
                Ok(())
            }
            Err(e) => {
                self.lost.store(true, Ordering::SeqCst);
                error!(error = %e, "re-authentication failed");
                Err(e)
            }
        }
    }

    async fn renew(&self) -> TokenOutcome {
        let current = self.handle.current().await;
        match self.credentials.refresh(&current).await {
            Ok(credential) => {
                self.handle.replace(credential).await;
                debug!("credential refreshed");
                TokenOutcome::Refreshed
            }
            Err(refresh_error) => {
                warn!(error = %refresh_error, "credential refresh failed, re-authenticating");
                match self.credentials.reauthenticate().await {
                    Ok(credential) => {
                        self.handle.replace(credential).await;
                        info!("re-authenticated after failed refresh");
                        TokenOutcome::Reauthenticated
                    }
                    Err(e) => {
                        self.lost.store(true, Ordering::SeqCst);
                        error!(error = %e, "re-authentication failed; credentials lost");
                        TokenOutcome::Lost
                    }
                }
            }
        }
    }

    /// Backs up the store if the backup interval has elapsed.
    ///
    /// Returns the backup path when one was written. Backup failures are
    /// logged and do not affect the run.
    #[instrument(skip(self))]
    pub async fn check_backup(&self) -> Option<PathBuf> {
        let Ok(mut last) = self.last_backup.try_lock() else {
            return None;
        };
        if last.elapsed() < self.settings.backup_interval {
            return None;
        }

        let written = match self.write_backup().await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "store backup failed");
                None
            }
        };
        *last = Instant::now();
        written
    }

    /// Backs up the store regardless of the elapsed time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backup`] if the snapshot or directory cannot be written.
    pub async fn backup_now(&self) -> Result<PathBuf, StoreError> {
        let mut last = self.last_backup.lock().await;
        let path = self.write_backup().await?;
        *last = Instant::now();
        Ok(path)
    }

    async fn write_backup(&self) -> Result<PathBuf, StoreError> {
        let dir = &self.settings.backup_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StoreError::Backup(format!("{}: {e}", dir.display())))?;

        let target = next_backup_path(dir);
        self.store.backup_to(&target).await?;

        let removed = prune_backups(dir, self.settings.keep_backups)
            .await
            .map_err(|e| StoreError::Backup(format!("pruning {}: {e}", dir.display())))?;

        info!(path = %target.display(), pruned = removed, "progress store backed up");
        Ok(target)
    }
}

/// Picks a timestamped backup path that does not exist yet.
fn next_backup_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = dir.join(format!("{BACKUP_PREFIX}{stamp}.db"));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{BACKUP_PREFIX}{stamp}_{suffix}.db"));
        suffix += 1;
    }
    candidate
}

/// Deletes all but the newest `keep` backups in `dir`.
///
/// Backup names embed a sortable timestamp, so name order is age order.
/// Returns the number of files removed.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be read or a file cannot be removed.
pub async fn prune_backups(dir: &Path, keep: usize) -> io::Result<usize> {
    let mut backups = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(BACKUP_PREFIX) && name.ends_with(".db") {
            backups.push(entry.path());
        }
    }

    backups.sort_unstable_by(|a, b| b.cmp(a));
    let mut removed = 0;
    for stale in backups.into_iter().skip(keep) {
        tokio::fs::remove_file(&stale).await?;
        debug!(path = %stale.display(), "pruned old backup");
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::Database;

    #[derive(Default)]
    struct ScriptedCredentials {
        refresh_fails: bool,
        reauth_fails: bool,
        refreshes: AtomicUsize,
        reauths: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for ScriptedCredentials {
        async fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.refresh_fails {
                Err(CredentialError::Transport("refresh down".to_string()))
            } else {
                Ok(Credential::new(format!("refreshed-{n}")))
            }
        }

        async fn reauthenticate(&self) -> Result<Credential, CredentialError> {
            let n = self.reauths.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reauth_fails {
                Err(CredentialError::Transport("idp down".to_string()))
            } else {
                Ok(Credential::new(format!("reauth-{n}")))
            }
        }
    }

    async fn lifecycle_with(
        credentials: Arc<ScriptedCredentials>,
        temp_dir: &TempDir,
        interval: Duration,
    ) -> Lifecycle {
        let db = Database::new(&temp_dir.path().join("progress.db"))
            .await
            .unwrap();
        let mut settings = LifecycleSettings::new(temp_dir.path());
        settings.token_refresh_interval = interval;
        settings.backup_interval = interval;
        settings.trigger_every = 3;
        Lifecycle::new(
            settings,
            credentials,
            CredentialHandle::new(Credential::new("initial")),
            ProgressStore::new(db),
        )
    }

    #[tokio::test]
    async fn test_check_token_not_due_before_interval() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials::default());
        let lifecycle =
            lifecycle_with(credentials.clone(), &temp_dir, Duration::from_secs(3600)).await;

        assert_eq!(lifecycle.check_token().await, TokenOutcome::NotDue);
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_token_refreshes_when_due() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials::default());
        let lifecycle = lifecycle_with(credentials.clone(), &temp_dir, Duration::ZERO).await;

        assert_eq!(lifecycle.check_token().await, TokenOutcome::Refreshed);
        assert_eq!(
            lifecycle.credential().current().await.access_token(),
            "refreshed-1"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_reauthentication() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials {
            refresh_fails: true,
            ..ScriptedCredentials::default()
        });
        let lifecycle = lifecycle_with(credentials.clone(), &temp_dir, Duration::ZERO).await;

        assert_eq!(lifecycle.check_token().await, TokenOutcome::Reauthenticated);
        assert_eq!(
            lifecycle.credential().current().await.access_token(),
            "reauth-1"
        );
        assert!(!lifecycle.credentials_lost());
    }

    #[tokio::test]
    async fn test_failed_reauthentication_marks_credentials_lost() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials {
            refresh_fails: true,
            reauth_fails: true,
            ..ScriptedCredentials::default()
        });
        let lifecycle = lifecycle_with(credentials, &temp_dir, Duration::ZERO).await;

        assert_eq!(lifecycle.check_token().await, TokenOutcome::Lost);
        assert!(lifecycle.credentials_lost());
        assert!(lifecycle.reauthenticate().await.is_err());
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_swapped() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials::default());
        let lifecycle =
            lifecycle_with(credentials.clone(), &temp_dir, Duration::from_secs(3600)).await;
        let stale = lifecycle.credential().current().await;

        assert_eq!(
            lifecycle.force_refresh(&stale).await,
            TokenOutcome::Refreshed
        );
        assert_eq!(
            lifecycle.force_refresh(&stale).await,
            TokenOutcome::AlreadyRenewed
        );
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_file_processed_triggers_every_nth_file() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials::default());
        let lifecycle = lifecycle_with(credentials.clone(), &temp_dir, Duration::ZERO).await;

        lifecycle.on_file_processed().await;
        lifecycle.on_file_processed().await;
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 0);

        lifecycle.on_file_processed().await;
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
        assert!(temp_dir.path().join(BACKUP_DIR_NAME).exists());
    }

    #[tokio::test]
    async fn test_backup_now_writes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = Arc::new(ScriptedCredentials::default());
        let lifecycle =
            lifecycle_with(credentials, &temp_dir, Duration::from_secs(3600)).await;

        let path = lifecycle.backup_now().await.unwrap();

        assert!(path.exists());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(BACKUP_PREFIX)
        );
        assert!(lifecycle.check_backup().await.is_none());
    }

    #[tokio::test]
    async fn test_prune_backups_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        for day in 1..=7 {
            let name = format!("{BACKUP_PREFIX}202601{day:02}_120000.db");
            std::fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(temp_dir.path().join("unrelated.db"), b"x").unwrap();

        let removed = prune_backups(temp_dir.path(), 5).await.unwrap();

        assert_eq!(removed, 2);
        assert!(
            !temp_dir
                .path()
                .join(format!("{BACKUP_PREFIX}20260101_120000.db"))
                .exists()
        );
        assert!(
            temp_dir
                .path()
                .join(format!("{BACKUP_PREFIX}20260107_120000.db"))
                .exists()
        );
        assert!(temp_dir.path().join("unrelated.db").exists());
    }

    #[test]
    fn test_prune_backups_missing_dir_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = tokio_test::block_on(prune_backups(&temp_dir.path().join("absent"), 5));
        assert!(result.is_err());
    }
}
