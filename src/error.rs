//! Error taxonomy for the store, the remote collaborators and the engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::StoreState;

/// Errors raised by the local host store.
///
/// `StorageUnavailable`, `MigrationFailed` and `PopulationFailed` are
/// lifecycle errors and leave the handle in `Failed`. A missing key is not an
/// error: `HostStore::get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistent storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("schema migration to version {version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("initial population failed: {0}")]
    PopulationFailed(String),

    #[error("write of '{host}' failed: {reason}")]
    WriteFailed { host: String, reason: String },

    #[error("store is not ready (state: {0:?})")]
    NotReady(StoreState),

    #[error("store previously failed to open")]
    Failed,

    #[error("invalid schema version {0}: versions are positive integers")]
    InvalidVersion(u32),

    #[error("storage query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("storage worker failed: {0}")]
    Worker(String),
}

/// Errors from the bulk dataset endpoint or the prefix lookup service.
///
/// `Clone` because one failed in-flight query is delivered to every
/// coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service responded with HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("query task aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            RemoteError::Status(status.as_u16())
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced to whatever initializes the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors from one refresh cycle of the local store.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("bulk fetch failed: {0}")]
    Fetch(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
