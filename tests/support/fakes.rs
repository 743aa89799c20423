//! Scripted in-memory capabilities and a run harness for engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sharepoint_backup::credential::{
    Credential, CredentialError, CredentialHandle, CredentialProvider,
};
use sharepoint_backup::download::{
    PoolTimings, RetryPolicy, RunContext, WorkItem, create_failed_files_log, failed_files_layer,
};
use sharepoint_backup::provider::{
    ContentProvider, FolderRef, ItemKind, ItemPage, Library, ProviderError, RemoteItem, SiteSpec,
};
use sharepoint_backup::{Database, Lifecycle, LifecycleSettings, ProgressStore};
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

pub const SITE: &str = "Engineering";
pub const SITE_URL: &str = "https://contoso.sharepoint.com/sites/engineering";
pub const LIBRARY_ID: &str = "drive-1";
pub const LIBRARY: &str = "Documents";

/// Outcome of one scripted download call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    Transient,
    Permanent,
    Auth,
    Throttled,
}

impl Step {
    fn into_error(self, name: &str) -> Option<ProviderError> {
        match self {
            Self::Ok => None,
            Self::Transient => Some(ProviderError::transient(format!("HTTP 503 for {name}"))),
            Self::Permanent => Some(ProviderError::permanent(format!("HTTP 404 for {name}"))),
            Self::Auth => Some(ProviderError::auth(format!("HTTP 401 for {name}"))),
            Self::Throttled => Some(ProviderError::throttled(
                format!("HTTP 429 for {name}"),
                Some(Duration::ZERO),
            )),
        }
    }
}

pub fn file(id: &str, name: &str, size: u64) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        library_id: LIBRARY_ID.to_string(),
        name: name.to_string(),
        size_bytes: Some(size),
        kind: ItemKind::File,
    }
}

pub fn folder(id: &str, name: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        library_id: LIBRARY_ID.to_string(),
        name: name.to_string(),
        size_bytes: None,
        kind: ItemKind::Folder,
    }
}

/// Content provider driven by per-item scripts. Unscripted downloads succeed.
#[derive(Default)]
pub struct ScriptedProvider {
    libraries: HashMap<String, Vec<Library>>,
    broken_sites: HashMap<String, String>,
    folders: HashMap<(String, String), Vec<Vec<RemoteItem>>>,
    listing_failures: Mutex<HashMap<(String, String), usize>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
    download_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a site with `(library id, library name)` pairs.
    pub fn with_site(mut self, site: &str, libraries: &[(&str, &str)]) -> Self {
        self.libraries.insert(
            site.to_string(),
            libraries
                .iter()
                .map(|(id, name)| Library {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                })
                .collect(),
        );
        self
    }

    /// Makes `list_libraries` fail permanently for `site`.
    pub fn with_broken_site(mut self, site: &str) -> Self {
        self.broken_sites
            .insert(site.to_string(), format!("HTTP 404 resolving {site}"));
        self
    }

    /// Sets the listing pages of a folder.
    pub fn with_folder(mut self, library_id: &str, folder_id: &str, pages: Vec<Vec<RemoteItem>>) -> Self {
        self.folders
            .insert((library_id.to_string(), folder_id.to_string()), pages);
        self
    }

    /// Makes the first `count` listings of a folder fail transiently.
    pub fn with_listing_failures(self, library_id: &str, folder_id: &str, count: usize) -> Self {
        self.listing_failures
            .lock()
            .unwrap()
            .insert((library_id.to_string(), folder_id.to_string()), count);
        self
    }

    /// Queues download outcomes for an item id.
    pub fn with_script(self, item_id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script(item_id, steps);
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    /// Replaces the remaining script of an item.
    pub fn script(&self, item_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), steps.into_iter().collect());
    }

    /// Download calls made for an item.
    pub fn calls(&self, item_id: &str) -> usize {
        self.calls.lock().unwrap().get(item_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn list_libraries(
        &self,
        _credential: &Credential,
        site: &SiteSpec,
    ) -> Result<Vec<Library>, ProviderError> {
        if let Some(message) = self.broken_sites.get(&site.name) {
            return Err(ProviderError::permanent(message.clone()));
        }
        Ok(self.libraries.get(&site.name).cloned().unwrap_or_default())
    }

    async fn list_items(
        &self,
        _credential: &Credential,
        folder: &FolderRef,
        _page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage, ProviderError> {
        let key = (folder.library_id.clone(), folder.id.clone());
        {
            let mut failures = self.listing_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&key)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ProviderError::transient("connection reset while listing"));
            }
        }

        let pages = self.folders.get(&key).cloned().unwrap_or_default();
        let index = page_token
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        Ok(ItemPage {
            items: pages.get(index).cloned().unwrap_or_default(),
            next: (index + 1 < pages.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    async fn download(
        &self,
        _credential: &Credential,
        item: &RemoteItem,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), ProviderError> {
        *self.calls.lock().unwrap().entry(item.id.clone()).or_default() += 1;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Ok);

        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = step.into_error(&item.name) {
            return Err(error);
        }

        let size = usize::try_from(item.size_bytes.unwrap_or(7)).unwrap();
        let target = dir.join(file_name);
        tokio::fs::write(&target, vec![b'x'; size])
            .await
            .map_err(|e| ProviderError::io(&target, e))
    }
}

/// Credential provider that counts calls and can refuse re-authentication.
#[derive(Debug, Default)]
pub struct CountingCredentials {
    pub refreshes: AtomicUsize,
    pub reauths: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_reauth: AtomicBool,
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(CredentialError::Transport("refresh refused".to_string()));
        }
        Ok(Credential::new(format!("refreshed-{n}")))
    }

    async fn reauthenticate(&self) -> Result<Credential, CredentialError> {
        let n = self.reauths.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_reauth.load(Ordering::SeqCst) {
            return Err(CredentialError::Rejected {
                status: 401,
                message: "invalid_client".to_string(),
            });
        }
        Ok(Credential::new(format!("reauth-{n}")))
    }
}

/// Pool timings shrunk for tests.
pub fn fast_timings() -> PoolTimings {
    PoolTimings {
        dequeue_wait: Duration::from_millis(100),
        queue_poll: Duration::from_millis(10),
        drain_poll: Duration::from_millis(20),
        drain_timeout: Duration::from_secs(2),
        join_timeout: Duration::from_secs(2),
        enqueue_wait: Duration::from_millis(50),
        session_flush_every: 1,
    }
}

/// Everything an engine test needs, rooted in one temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub store: ProgressStore,
    pub provider: Arc<ScriptedProvider>,
    pub credentials: Arc<CountingCredentials>,
    pub ctx: Arc<RunContext>,
}

impl Harness {
    /// Root of the local mirror.
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Routes failed-file events on this thread to a new log in `log_dir`.
    pub fn capture_failed_files(&self) -> (PathBuf, DefaultGuard) {
        let (path, file) = create_failed_files_log(&self.log_dir()).unwrap();
        let subscriber = tracing_subscriber::registry().with(failed_files_layer(file));
        (path, tracing::subscriber::set_default(subscriber))
    }

    /// Local path of a file in the default site and library.
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.output_dir().join(SITE).join(LIBRARY).join(name)
    }

    /// Progress key of a file in the default site and library.
    pub fn key(&self, name: &str) -> String {
        self.local_path(name).to_string_lossy().into_owned()
    }

    /// Work item for a file in the default site and library.
    pub fn work(&self, item: RemoteItem) -> WorkItem {
        WorkItem {
            local_path: self.local_path(&item.name),
            item,
            site: SITE.to_string(),
            library: LIBRARY.to_string(),
        }
    }
}

/// Builds a harness with zero retry delays and shrunk timings.
pub async fn harness(provider: ScriptedProvider, max_attempts: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("progress.db")).await.unwrap();
    let store = ProgressStore::new(db);
    let provider = Arc::new(provider);
    let credentials = Arc::new(CountingCredentials::default());

    let lifecycle = Arc::new(Lifecycle::new(
        LifecycleSettings::new(&dir.path().join("out")),
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
        CredentialHandle::new(Credential::new("initial")),
        store.clone(),
    ));
    let session_id = store.create_session().await.unwrap();

    let ctx = Arc::new(
        RunContext::new(
            store.clone(),
            Arc::clone(&provider) as Arc<dyn ContentProvider>,
            lifecycle,
            RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO),
        )
        .with_timings(fast_timings())
        .with_session(session_id),
    );

    Harness {
        dir,
        store,
        provider,
        credentials,
        ctx,
    }
}
