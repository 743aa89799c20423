//! Client-credentials authentication against the Microsoft identity platform.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument, warn};

use super::models::{TokenErrorResponse, TokenResponse};
use super::{DEFAULT_LOGIN_BASE, GRAPH_SCOPE};
use crate::credential::{Credential, CredentialError, CredentialProvider};

/// Template written next to a missing credentials file.
pub const CREDENTIALS_TEMPLATE: &str = "# SharePoint Backup Credentials
# Register an application in Microsoft Entra ID with these application permissions:
# - Files.Read.All
# - Sites.Read.All

CLIENT_ID=your-client-id-here
CLIENT_SECRET=your-client-secret-here
TENANT_ID=your-tenant-id-here
";

/// Path of the template written for `path`.
#[must_use]
pub fn template_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".template");
    PathBuf::from(name)
}

/// Writes the credentials template for `path` and returns where it went.
///
/// # Errors
///
/// Returns the IO error if the template cannot be written.
pub fn write_template(path: &Path) -> std::io::Result<PathBuf> {
    let template = template_path(path);
    std::fs::write(&template, CREDENTIALS_TEMPLATE)?;
    Ok(template)
}

/// App registration secrets read from the credentials file.
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredentials {
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Directory (tenant) id.
    pub tenant_id: String,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl AppCredentials {
    /// Reads `KEY=value` lines from `path`.
    ///
    /// A missing file gets a template written next to it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MissingFile`] when the file is absent,
    /// [`CredentialError::MissingField`] when a key is absent or empty, and
    /// [`CredentialError::Io`] when reading fails.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        if !path.exists() {
            let template = write_template(path).map_err(|source| CredentialError::Io {
                path: template_path(path),
                source,
            })?;
            return Err(CredentialError::MissingFile {
                path: path.to_path_buf(),
                template,
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Parses credentials file content; `path` is used in errors only.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MissingField`] for an absent or empty key.
    pub fn parse(path: &Path, content: &str) -> Result<Self, CredentialError> {
        let mut client_id = String::new();
        let mut client_secret = String::new();
        let mut tenant_id = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let slot = match key.trim() {
                "CLIENT_ID" => &mut client_id,
                "CLIENT_SECRET" => &mut client_secret,
                "TENANT_ID" => &mut tenant_id,
                _ => continue,
            };
            *slot = value.trim().to_string();
        }

        let require = |value: String, field: &'static str| {
            if value.is_empty() {
                Err(CredentialError::MissingField {
                    path: path.to_path_buf(),
                    field,
                })
            } else {
                Ok(value)
            }
        };

        Ok(Self {
            client_id: require(client_id, "CLIENT_ID")?,
            client_secret: require(client_secret, "CLIENT_SECRET")?,
            tenant_id: require(tenant_id, "TENANT_ID")?,
        })
    }
}

/// Obtains app-only tokens with the client-credentials grant.
///
/// The grant has no refresh token, so a refresh requests a new token.
#[derive(Debug, Clone)]
pub struct GraphAuth {
    http: Client,
    login_base: String,
    credentials: AppCredentials,
}

impl GraphAuth {
    /// Creates an authenticator against the public login endpoint.
    #[must_use]
    pub fn new(http: Client, credentials: AppCredentials) -> Self {
        Self::with_login_base(http, credentials, DEFAULT_LOGIN_BASE)
    }

    /// Creates an authenticator against a custom login endpoint.
    #[must_use]
    pub fn with_login_base(
        http: Client,
        credentials: AppCredentials,
        login_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            login_base: login_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base, self.credentials.tenant_id
        )
    }

    /// Requests a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Rejected`] when the endpoint refuses the
    /// request and [`CredentialError::Transport`] when it cannot be reached.
    #[instrument(skip(self), fields(tenant = %self.credentials.tenant_id))]
    pub async fn request_token(&self) -> Result<Credential, CredentialError> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ];
        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TokenErrorResponse>(&body).map_or(body, |e| {
                e.error_description
                    .map_or(e.error.clone(), |d| format!("{}: {d}", e.error))
            });
            warn!(status = status.as_u16(), "token request rejected");
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Transport(format!("invalid token response: {e}")))?;
        info!(expires_in = ?token.expires_in, "access token acquired");
        Ok(Credential::new(token.access_token))
    }
}

#[async_trait]
impl CredentialProvider for GraphAuth {
    async fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialError> {
        self.request_token().await
    }

    async fn reauthenticate(&self) -> Result<Credential, CredentialError> {
        self.request_token().await
    }
}
