//! Credential capability and the shared credential handle.
//!
//! Workers read the active [`Credential`] through a [`CredentialHandle`] before
//! each request. The lifecycle manager swaps a new credential in after a
//! refresh or re-authentication; readers never block each other.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from acquiring or renewing a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The credentials file does not exist; a template was written next to it.
    #[error(
        "credentials file not found: {path}\n  Suggestion: fill in {template} and save it as {path}"
    )]
    MissingFile {
        /// Expected credentials path.
        path: PathBuf,
        /// Template written for the operator.
        template: PathBuf,
    },

    /// A required field is absent or empty.
    #[error("credentials file {path} is missing {field}")]
    MissingField {
        /// Credentials path.
        path: PathBuf,
        /// Field name, e.g. `CLIENT_SECRET`.
        field: &'static str,
    },

    /// The identity provider refused the request.
    #[error("token request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Error description from the response body.
        message: String,
    },

    /// The token endpoint could not be reached or returned garbage.
    #[error("token request failed: {0}")]
    Transport(String),

    /// Reading the credentials file failed.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// An access credential for the content provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
}

impl Credential {
    /// Wraps a bearer token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Shared, swappable handle to the active credential.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    inner: Arc<RwLock<Credential>>,
}

impl CredentialHandle {
    /// Creates a handle holding `credential`.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credential)),
        }
    }

    /// Returns a copy of the active credential.
    pub async fn current(&self) -> Credential {
        self.inner.read().await.clone()
    }

    /// Replaces the active credential.
    pub async fn replace(&self, credential: Credential) {
        *self.inner.write().await = credential;
    }
}

/// Capability to renew the active credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Refreshes `current` in place, returning the renewed credential.
    async fn refresh(&self, current: &Credential) -> Result<Credential, CredentialError>;

    /// Performs a full authentication from stored secrets.
    async fn reauthenticate(&self) -> Result<Credential, CredentialError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::new("secret-token");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn test_credential_handle_replace_is_visible_to_clones() {
        let handle = CredentialHandle::new(Credential::new("first"));
        let clone = handle.clone();

        handle.replace(Credential::new("second")).await;

        assert_eq!(clone.current().await.access_token(), "second");
    }

    #[test]
    fn test_missing_file_error_mentions_template() {
        let err = CredentialError::MissingFile {
            path: PathBuf::from("credentials.txt"),
            template: PathBuf::from("credentials.txt.template"),
        };
        assert!(err.to_string().contains("credentials.txt.template"));
    }
}
