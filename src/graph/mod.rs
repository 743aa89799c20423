//! Microsoft Graph implementation of the content and credential capabilities.
//!
//! Sites are addressed by `host:/path` ids derived from their URL, libraries
//! are Graph drives, and folder listings follow `@odata.nextLink` as the
//! continuation token. File content is streamed to a `.part` file and renamed
//! into place once complete.

mod auth;
mod models;

pub use auth::{AppCredentials, CREDENTIALS_TEMPLATE, GraphAuth, template_path, write_template};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::credential::Credential;
use crate::provider::{
    ContentProvider, FolderRef, ItemPage, Library, ProviderError, RemoteItem, SiteSpec,
};
use models::{Collection, Drive, DriveItem, ErrorEnvelope, SiteResponse};

/// Graph v1.0 root.
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Identity platform root.
pub const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// App-only scope covering every granted Graph permission.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// HTTP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout; large files need minutes.
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on a server supplied Retry-After.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Suffix of in-progress downloads.
const PART_SUFFIX: &str = ".part";

/// User-Agent sent on every request.
#[must_use]
pub fn default_user_agent() -> String {
    format!("sharepoint-backup/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds the shared HTTP client.
///
/// # Errors
///
/// Returns the builder error if TLS or proxy setup fails.
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .gzip(true)
        .user_agent(default_user_agent())
        .build()
}

/// Converts a site URL to a Graph site id.
///
/// `https://host/sites/x/` becomes `host:/sites/x`; a bare host stays `host`.
///
/// # Errors
///
/// Returns [`ProviderError::Permanent`] when the URL cannot be parsed or has no host.
pub fn site_id_from_url(site_url: &str) -> Result<String, ProviderError> {
    let parsed = Url::parse(site_url.trim())
        .map_err(|e| ProviderError::permanent(format!("invalid site URL {site_url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ProviderError::permanent(format!("site URL has no host: {site_url}")))?;

    let path = parsed.path().trim_end_matches('/');
    if path.is_empty() {
        Ok(host.to_string())
    } else {
        Ok(format!("{host}:{path}"))
    }
}

/// Parses a delay-seconds Retry-After value, capped at [`MAX_RETRY_AFTER`].
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Maps a non-success response to a typed provider error.
///
/// | Status | Error |
/// |---|---|
/// | 401, 403 | `Auth` |
/// | 429, 503 with Retry-After | `Throttled` |
/// | 410 | `Pagination` |
/// | other 4xx | `Permanent` |
/// | 5xx | `Transient` |
async fn error_for_response(url: &str, response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| format!("{}: {}", e.error.code, e.error.message))
        .unwrap_or(body);
    let message = format!("HTTP {} from {url}: {detail}", status.as_u16());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::auth(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::throttled(message, retry_after),
        StatusCode::SERVICE_UNAVAILABLE if retry_after.is_some() => {
            ProviderError::throttled(message, retry_after)
        }
        StatusCode::GONE => ProviderError::pagination(message),
        s if s.is_client_error() => ProviderError::permanent(message),
        s if s.is_server_error() => ProviderError::transient(message),
        _ => ProviderError::unclassified(message),
    }
}

/// Maps a transport failure.
///
/// Timeouts and refused connections are transient; anything else is left to
/// the keyword classifier.
fn error_for_transport(url: &str, error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::transient(format!("timeout requesting {url}"))
    } else if error.is_connect() {
        ProviderError::transient(format!("connection failed for {url}: {error}"))
    } else {
        ProviderError::unclassified(format!("request to {url} failed: {error}"))
    }
}

/// Graph-backed [`ContentProvider`].
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base: String,
}

impl GraphClient {
    /// Creates a client against the public Graph endpoint.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self::with_base(http, DEFAULT_GRAPH_BASE)
    }

    /// Creates a client against a custom Graph root.
    #[must_use]
    pub fn with_base(http: Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn send(&self, credential: &Credential, url: &str) -> Result<Response, ProviderError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(credential.access_token())
            .send()
            .await
            .map_err(|e| error_for_transport(url, &e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_for_response(url, response).await)
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: &str,
    ) -> Result<T, ProviderError> {
        self.send(credential, url)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transient(format!("invalid response from {url}: {e}")))
    }

    /// Resolves a site URL to its Graph id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the URL is invalid or the lookup fails.
    pub async fn resolve_site(
        &self,
        credential: &Credential,
        site_url: &str,
    ) -> Result<String, ProviderError> {
        let site_id = site_id_from_url(site_url)?;
        let url = format!("{}/sites/{site_id}", self.base);
        let site: SiteResponse = self.get_json(credential, &url).await?;
        debug!(site_id = %site.id, "resolved site");
        Ok(site.id)
    }

    /// Validates a continuation link before following it.
    fn continuation_url(&self, token: &str) -> Result<String, ProviderError> {
        let next = Url::parse(token)
            .map_err(|e| ProviderError::pagination(format!("invalid continuation link: {e}")))?;
        let base = Url::parse(&self.base)
            .map_err(|e| ProviderError::permanent(format!("invalid Graph base: {e}")))?;
        if next.host_str() != base.host_str() {
            return Err(ProviderError::pagination(format!(
                "continuation link points at another host: {token}"
            )));
        }
        Ok(next.into())
    }
}

#[async_trait]
impl ContentProvider for GraphClient {
    #[instrument(skip(self, credential, site), fields(site = %site.name))]
    async fn list_libraries(
        &self,
        credential: &Credential,
        site: &SiteSpec,
    ) -> Result<Vec<Library>, ProviderError> {
        let site_id = self.resolve_site(credential, &site.url).await?;

        let mut libraries = Vec::new();
        let mut url = format!("{}/sites/{site_id}/drives", self.base);
        loop {
            let page: Collection<Drive> = self.get_json(credential, &url).await?;
            libraries.extend(
                page.value
                    .into_iter()
                    .filter(Drive::is_document_library)
                    .map(|d| Library {
                        id: d.id,
                        name: d.name,
                    }),
            );
            match page.next_link {
                Some(next) if next != url => url = self.continuation_url(&next)?,
                Some(_) => {
                    warn!("drive listing repeated its continuation link");
                    break;
                }
                None => break,
            }
        }

        debug!(count = libraries.len(), "listed document libraries");
        Ok(libraries)
    }

    async fn list_items(
        &self,
        credential: &Credential,
        folder: &FolderRef,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage, ProviderError> {
        let url = match page_token {
            Some(token) => self.continuation_url(token)?,
            None => format!(
                "{}/drives/{}/items/{}/children?$top={page_size}",
                self.base,
                urlencoding::encode(&folder.library_id),
                urlencoding::encode(&folder.id)
            ),
        };

        let page: Collection<DriveItem> = self.get_json(credential, &url).await?;
        Ok(ItemPage {
            items: page
                .value
                .into_iter()
                .map(|i| i.into_remote(&folder.library_id))
                .collect(),
            next: page.next_link,
        })
    }

    #[instrument(skip(self, credential, item, dir), fields(item = %item.id))]
    async fn download(
        &self,
        credential: &Credential,
        item: &RemoteItem,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/drives/{}/items/{}/content",
            self.base,
            urlencoding::encode(&item.library_id),
            urlencoding::encode(&item.id)
        );
        let response = self.send(credential, &url).await?;

        let target = dir.join(file_name);
        let part = dir.join(format!("{file_name}{PART_SUFFIX}"));

        let streamed = stream_to_file(response, &url, &part).await;
        if let Err(e) = streamed {
            debug!(path = %part.display(), "removing partial file after error");
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &target)
            .await
            .map_err(|e| ProviderError::io(&target, e))?;
        Ok(())
    }
}

/// Streams a response body into `path`, returning bytes written.
async fn stream_to_file(response: Response, url: &str, path: &Path) -> Result<u64, ProviderError> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ProviderError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                ProviderError::transient(format!("timeout streaming {url}"))
            } else {
                ProviderError::transient(format!("connection lost streaming {url}: {e}"))
            }
        })?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| ProviderError::io(path, e))?;
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_from_url_with_path() {
        assert_eq!(
            site_id_from_url("https://contoso.sharepoint.com/sites/Engineering/").unwrap(),
            "contoso.sharepoint.com:/sites/Engineering"
        );
    }

    #[test]
    fn test_site_id_from_url_bare_host() {
        assert_eq!(
            site_id_from_url("https://contoso.sharepoint.com").unwrap(),
            "contoso.sharepoint.com"
        );
        assert_eq!(
            site_id_from_url("https://contoso.sharepoint.com/").unwrap(),
            "contoso.sharepoint.com"
        );
    }

    #[test]
    fn test_site_id_from_url_invalid() {
        assert!(matches!(
            site_id_from_url("not a url"),
            Err(ProviderError::Permanent { .. })
        ));
    }

    #[test]
    fn test_user_agent_has_version() {
        assert!(default_user_agent().ends_with(env!("CARGO_PKG_VERSION")));
    }
}
