//! SharePoint Backup Library
//!
//! This library mirrors SharePoint document libraries to local storage in
//! long, resumable runs. Every file's lifecycle is tracked in a durable
//! `SQLite` progress store, so an interrupted run picks up where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - Progress store: per-file, per-site, counters and sessions
//! - [`provider`] - Remote content capability consumed by the engine
//! - [`credential`] - Credential capability and the shared credential handle
//! - [`lifecycle`] - Token refresh and progress store backups
//! - [`download`] - Worker pool, retry policy and per-file algorithm
//! - [`discovery`] - Folder tree walker feeding the worker pool
//! - [`orchestrator`] - Site-by-site state machine
//! - [`graph`] - Microsoft Graph implementation of the capabilities
//! - [`config`], [`sites`] - Run configuration and the sites list
//! - [`report`] - Read-only statistics and dashboard reports

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credential;
pub mod db;
pub mod discovery;
pub mod download;
pub mod graph;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod report;
pub mod sites;
pub mod store;

// Re-export commonly used types
pub use config::{BackupConfig, ConfigError};
pub use credential::{Credential, CredentialError, CredentialHandle, CredentialProvider};
pub use db::{Database, DatabaseOptions, DbError};
pub use discovery::{DiscoveryError, DiscoveryReport, DiscoveryWalker};
pub use download::{
    FailureType, FileOutcome, PoolTimings, RetryDecision, RetryPolicy, RunContext, WorkerPool,
    classify_error,
};
pub use lifecycle::{Lifecycle, LifecycleSettings, TokenOutcome};
pub use orchestrator::{
    Orchestrator, OrchestratorError, OrchestratorSettings, RunSummary, SiteDisposition,
    SiteOutcome,
};
pub use provider::{ContentProvider, ProviderError, SiteSpec};
pub use store::{FileStatus, ProgressStore, SiteStatus, StoreError};
