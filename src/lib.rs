//! # HTTPS Upgrade Classification
//!
//! Decides whether a host should be contacted over HTTPS instead of HTTP.
//!
//! Architecture:
//! - **Local store** (SQLite): hosts from the bulk dataset, exact and wildcard
//! - **Prefix cache** (in-memory): answers from earlier remote lookups, keyed by hash prefix
//! - **Remote lookup**: k-anonymous query that sends only a SHA-1 prefix of the host
//!
//! Concurrent lookups for the same prefix share a single request.

pub mod engine;
pub mod error;
pub mod hasher;
pub mod lookup;
pub mod refresh;
pub mod remote;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use engine::{EngineConfig, EngineStats, UpgradeEngine};
pub use error::{EngineError, RefreshError, RemoteError, StoreError};
pub use hasher::{HashPrefix, HostDigest, HASH_PREFIX_SIZE};
pub use lookup::{InFlightTracker, PrefixCache, PrefixEntry};
pub use remote::{BulkDataset, BulkFetcher, PrefixLookup};
pub use storage::{HostRecord, HostStore, StoreConfig, StoreState};
pub use telemetry::{EngineObserver, TelemetryRecorder};
pub use types::{Classification, Verdict, VerdictSource};
