//! Retry classification and linear backoff for file downloads.
//!
//! When a download attempt fails, the [`ProviderError`] is classified into a
//! [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, resets, local hiccups; short backoff
//! - [`FailureType::Api`] - throttling or a rejected call; API backoff, counted
//! - [`FailureType::NeedsRefresh`] - auth or pagination drift; refresh credential first
//! - [`FailureType::Permanent`] - will not succeed on retry
//!
//! The [`RetryPolicy`] then decides whether to retry. Delays grow linearly:
//! `base × attempt`, where the base depends on the failure type.
//!
//! # Example
//!
//! ```
//! use sharepoint_backup::download::{RetryDecision, RetryPolicy, classify_error};
//! use sharepoint_backup::provider::ProviderError;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30));
//! let error = ProviderError::transient("connection reset");
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => assert_eq!((delay, attempt), (Duration::from_secs(2), 2)),
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use crate::provider::{KeywordClass, ProviderError};

/// Default maximum attempts per file.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for transient failures.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default base delay for API, throttling and auth failures.
pub const DEFAULT_API_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Classification of download failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure; retried with the short base delay.
    Transient,

    /// Remote API trouble (throttling, rejected download); retried with the
    /// API base delay and counted as an API error.
    Api,

    /// The credential is suspect; it is renewed before the retry.
    /// Counted as an API error and backed off with the API base delay.
    NeedsRefresh,

    /// Retrying would not help.
    Permanent,
}

impl FailureType {
    /// Returns true when the failure bumps the `api_errors` counter.
    #[must_use]
    pub fn counts_as_api_error(self) -> bool {
        matches!(self, Self::Api | Self::NeedsRefresh)
    }

    /// Returns true when the credential should be renewed before retrying.
    #[must_use]
    pub fn wants_credential_refresh(self) -> bool {
        matches!(self, Self::NeedsRefresh)
    }
}

/// Decision on whether to retry a failed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number that will run next (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry limits and linear backoff bases.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per file, including the first.
    max_attempts: u32,

    /// Base delay for transient failures.
    retry_delay: Duration,

    /// Base delay for API, throttling and auth failures.
    api_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            api_delay: DEFAULT_API_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is raised to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, retry_delay: Duration, api_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            api_delay,
        }
    }

    /// Creates a policy with a custom attempt limit and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-indexed) should be followed by another.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(failure_type, attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Linear backoff: `base × attempt`.
    fn delay_for(&self, failure_type: FailureType, attempt: u32) -> Duration {
        let base = match failure_type {
            FailureType::Transient | FailureType::Permanent => self.retry_delay,
            FailureType::Api | FailureType::NeedsRefresh => self.api_delay,
        };
        base.saturating_mul(attempt)
    }
}

/// Classifies a provider error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Transient | Transient |
/// | Throttled, Rejected | Api |
/// | Auth, Pagination | NeedsRefresh |
/// | Permanent, Io | Permanent |
/// | Unclassified | keyword fallback: token/auth, timeout/connection, index drift → NeedsRefresh; api → Api; else Transient |
#[instrument]
pub fn classify_error(error: &ProviderError) -> FailureType {
    match error {
        ProviderError::Transient { .. } => FailureType::Transient,
        ProviderError::Throttled { .. } | ProviderError::Rejected { .. } => FailureType::Api,
        ProviderError::Auth { .. } | ProviderError::Pagination { .. } => {
            FailureType::NeedsRefresh
        }
        ProviderError::Permanent { .. } | ProviderError::Io { .. } => FailureType::Permanent,
        ProviderError::Unclassified { .. } => match error.keyword_class() {
            KeywordClass::Credential | KeywordClass::Network | KeywordClass::Drift => {
                FailureType::NeedsRefresh
            }
            KeywordClass::Api => FailureType::Api,
            KeywordClass::Unknown => FailureType::Transient,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.api_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_transient_backoff_is_linear() {
        let policy = policy();
        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(2),
                attempt: 2
            }
        );
        assert_eq!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry {
                delay: Duration::from_secs(4),
                attempt: 3
            }
        );
    }

    #[test]
    fn test_api_failures_use_api_delay() {
        let decision = policy().should_retry(FailureType::NeedsRefresh, 2);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(60),
                attempt: 3
            }
        );
    }

    #[test]
    fn test_last_attempt_is_not_retried() {
        let decision = policy().should_retry(FailureType::Transient, 3);
        assert!(matches!(decision, RetryDecision::DoNotRetry { reason } if reason.contains("exhausted")));
    }

    #[test]
    fn test_permanent_is_never_retried() {
        let decision = policy().should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_classify_structured_kinds() {
        assert_eq!(
            classify_error(&ProviderError::transient("reset")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&ProviderError::throttled("429", None)),
            FailureType::Api
        );
        assert_eq!(
            classify_error(&ProviderError::rejected("no content")),
            FailureType::Api
        );
        assert_eq!(
            classify_error(&ProviderError::auth("401")),
            FailureType::NeedsRefresh
        );
        assert_eq!(
            classify_error(&ProviderError::pagination("index out of range")),
            FailureType::NeedsRefresh
        );
        assert_eq!(
            classify_error(&ProviderError::permanent("404")),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_classify_unclassified_uses_keywords() {
        assert_eq!(
            classify_error(&ProviderError::unclassified("token expired")),
            FailureType::NeedsRefresh
        );
        assert_eq!(
            classify_error(&ProviderError::unclassified("connection aborted")),
            FailureType::NeedsRefresh
        );
        assert_eq!(
            classify_error(&ProviderError::unclassified("api call rejected")),
            FailureType::Api
        );
        assert_eq!(
            classify_error(&ProviderError::unclassified("something odd")),
            FailureType::Transient
        );
    }

    #[test]
    fn test_unclassified_network_and_drift_refresh_and_count() {
        for text in ["operation timeout", "connection reset", "IndexError: list index out of range"] {
            let failure = classify_error(&ProviderError::unclassified(text));
            assert!(failure.wants_credential_refresh(), "{text}");
            assert!(failure.counts_as_api_error(), "{text}");
        }
    }

    #[test]
    fn test_failure_type_flags() {
        assert!(FailureType::Api.counts_as_api_error());
        assert!(FailureType::NeedsRefresh.wants_credential_refresh());
        assert!(!FailureType::Transient.counts_as_api_error());
        assert!(!FailureType::Api.wants_credential_refresh());
    }
}
