//! Error types for progress store operations.

use std::fmt;

use thiserror::Error;

/// Whether a database failure concerns one statement or the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The pool is closed or the database file cannot be reached.
    Unavailable,
    /// A single statement failed (constraint, busy, malformed row).
    Query,
}

impl StoreErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => Self::Unavailable,
            _ => Self::Query,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "unavailable",
            Self::Query => "query",
        })
    }
}

/// Errors that can occur during progress store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Statement or store-wide failure.
        kind: StoreErrorKind,
        /// Database error text.
        message: String,
    },

    /// No download record exists for the given path.
    #[error("no download record for {0}")]
    RecordNotFound(String),

    /// A stored status value is not one the store understands.
    #[error("invalid status '{0}' in progress store")]
    InvalidStatus(String),

    /// Writing a store backup failed.
    #[error("backup failed: {0}")]
    Backup(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl From<crate::db::DbError> for StoreError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::Connection(inner) => inner.into(),
            other => Self::Backup(other.to_string()),
        }
    }
}

impl StoreError {
    /// Returns true when the store cannot be reached at all.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Database {
                kind: StoreErrorKind::Unavailable,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_is_unavailable() {
        let err = StoreError::from(sqlx::Error::PoolClosed);
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_statement_failure_is_not_unavailable() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_unavailable());
        assert!(err.to_string().contains("(query)"));

        let err = StoreError::RecordNotFound("/out/a.txt".to_string());
        assert!(err.to_string().contains("/out/a.txt"));
        assert!(!err.is_unavailable());
    }
}
