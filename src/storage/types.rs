//! Storage data structures.
//!
//! Defines the host record kept in the local store, the store lifecycle
//! states and the host-key normalisation shared by writers and readers.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::now_ms;

/// One known host in the local store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Normalised host or `*.`-wildcard pattern (primary key)
    pub host: String,

    /// Whether requests to this host should be upgraded
    #[serde(rename = "simpleUpgrade")]
    pub simple_upgrade: bool,

    /// Last write time (Unix timestamp ms)
    #[serde(rename = "lastUpdated")]
    pub last_updated: u64,
}

impl HostRecord {
    /// Create an upgrade-worthy record stamped with the current time.
    pub fn upgrade(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            simple_upgrade: true,
            last_updated: now_ms(),
        }
    }

    /// Whether this record is a `*.`-wildcard pattern.
    pub fn is_wildcard(&self) -> bool {
        self.host.starts_with("*.")
    }
}

/// Lifecycle of a store handle.
///
/// First-ever open: `Unopened → Upgrading → Populating → Ready`.
/// Schema bump: `Unopened → Upgrading → Ready`. Current schema:
/// `Unopened → Ready`. `Failed` is terminal for the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreState {
    Unopened,
    Upgrading,
    Populating,
    Ready,
    Failed,
    Closed,
}

impl StoreState {
    pub fn is_ready(&self) -> bool {
        matches!(self, StoreState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StoreState::Failed | StoreState::Closed)
    }
}

/// Statistics about the store.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    /// Number of host records on disk
    pub records: usize,
    /// Number of wildcard records on disk
    pub wildcard_records: usize,
    /// Records written through the write queue
    pub writes: u64,
    /// Records whose write failed
    pub write_failures: u64,
}

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\*\.)?([a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?\.)*[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?$")
            .expect("host pattern is a valid regex")
    })
}

/// Normalise a host key: trim, lower-case, drop one trailing dot.
///
/// Returns `None` when the result is not a valid host or wildcard pattern.
pub fn normalize_host(raw: &str) -> Option<String> {
    let host = raw.trim().to_ascii_lowercase();
    let host = host.strip_suffix('.').unwrap_or(&host);
    if host.is_empty() || host.len() > 253 || !host_pattern().is_match(host) {
        return None;
    }
    Some(host.to_string())
}

/// Keys to try for `host`, most specific first.
///
/// `a.b.example.com` yields `a.b.example.com`, `*.b.example.com`,
/// `*.example.com`. Wildcards never cover the apex and single-label
/// wildcards (`*.com`) are not produced.
pub fn match_candidates(host: &str) -> Vec<String> {
    let mut candidates = vec![host.to_string()];
    if host.starts_with("*.") {
        return candidates;
    }
    let labels: Vec<&str> = host.split('.').collect();
    for start in 1..labels.len().saturating_sub(1) {
        candidates.push(format!("*.{}", labels[start..].join(".")));
    }
    candidates
}
