//! Error types returned by remote content providers.
//!
//! Providers report a structured kind at the boundary. When a provider can only
//! offer free text, [`ProviderError::Unclassified`] carries it and
//! [`ProviderError::keyword_class`] applies the legacy keyword heuristic.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Keywords that mark an unclassified failure as credential related.
const CREDENTIAL_KEYWORDS: [&str; 2] = ["token", "auth"];

/// Keywords that mark an unclassified failure as a dropped or stalled connection.
const NETWORK_KEYWORDS: [&str; 2] = ["timeout", "connection"];

/// Text of a listing that shifted under the reader (an index past the end).
const DRIFT_KEYWORDS: [&str; 2] = ["index out of range", "indexerror"];

/// Keyword that marks an unclassified failure as a remote API problem.
const API_KEYWORD: &str = "api";

/// Result of the keyword fallback for unclassified errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordClass {
    /// Text mentions a token or authentication problem.
    Credential,
    /// Text mentions a timeout or a connection problem.
    Network,
    /// Text reports an index past the end of a listing.
    Drift,
    /// Text mentions the API.
    Api,
    /// No keyword matched.
    Unknown,
}

/// Errors reported by a [`ContentProvider`](super::ContentProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Temporary failure (timeout, reset connection, 5xx).
    #[error("transient error: {message}")]
    Transient {
        /// Provider supplied detail.
        message: String,
    },

    /// Failure that will not succeed on retry (404, 400, unsupported item).
    #[error("permanent error: {message}")]
    Permanent {
        /// Provider supplied detail.
        message: String,
    },

    /// The credential was rejected or has expired.
    #[error("authentication error: {message}")]
    Auth {
        /// Provider supplied detail.
        message: String,
    },

    /// The remote service asked the caller to slow down.
    #[error("throttled: {message}")]
    Throttled {
        /// Provider supplied detail.
        message: String,
        /// Server supplied wait, when present.
        retry_after: Option<Duration>,
    },

    /// A listing page no longer lines up with the previous page.
    #[error("pagination anomaly: {message}")]
    Pagination {
        /// Provider supplied detail.
        message: String,
    },

    /// The download call returned without error but reported no success.
    #[error("download rejected: {message}")]
    Rejected {
        /// Provider supplied detail.
        message: String,
    },

    /// Writing the local file failed.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Local path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Free-text failure with no structured kind.
    #[error("{message}")]
    Unclassified {
        /// Provider supplied detail.
        message: String,
    },
}

impl ProviderError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates a throttling error.
    pub fn throttled(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Throttled {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a pagination anomaly error.
    pub fn pagination(message: impl Into<String>) -> Self {
        Self::Pagination {
            message: message.into(),
        }
    }

    /// Creates a rejected download error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a local IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unclassified error.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::Unclassified {
            message: message.into(),
        }
    }

    /// Server supplied wait before the next request, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Applies the keyword heuristic to the error text.
    ///
    /// Only meaningful for [`ProviderError::Unclassified`]; structured variants
    /// are classified by kind.
    #[must_use]
    pub fn keyword_class(&self) -> KeywordClass {
        let text = self.to_string().to_ascii_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));
        if mentions(&CREDENTIAL_KEYWORDS) {
            KeywordClass::Credential
        } else if mentions(&NETWORK_KEYWORDS) {
            KeywordClass::Network
        } else if mentions(&DRIFT_KEYWORDS) {
            KeywordClass::Drift
        } else if text.contains(API_KEYWORD) {
            KeywordClass::Api
        } else {
            KeywordClass::Unknown
        }
    }
}
