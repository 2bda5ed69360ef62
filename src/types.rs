//! Shared verdict types and time helpers.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Answer to "should this host be upgraded to HTTPS?".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Always upgrade this host's connections.
    Upgrade,
    /// The authoritative data says the host is not upgrade-worthy.
    NoUpgrade,
    /// No authoritative answer could be obtained (e.g. lookup failed).
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Upgrade => "upgrade",
            Verdict::NoUpgrade => "no-upgrade",
            Verdict::Unknown => "unknown",
        }
    }

    /// Collapse `Unknown` according to the caller's fail-open/fail-closed policy.
    pub fn should_upgrade(&self, upgrade_when_unknown: bool) -> bool {
        match self {
            Verdict::Upgrade => true,
            Verdict::NoUpgrade => false,
            Verdict::Unknown => upgrade_when_unknown,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier produced a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerdictSource {
    /// Local host store (network-free fast path)
    Local,
    /// In-memory prefix cache
    Cache,
    /// Fresh remote query started by this caller
    Remote,
    /// Joined a remote query already in flight for the same prefix
    Coalesced,
    /// Remote query failed or timed out
    Failed,
    /// Host could not be normalised
    Invalid,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Local => "local",
            VerdictSource::Cache => "cache",
            VerdictSource::Remote => "remote",
            VerdictSource::Coalesced => "coalesced",
            VerdictSource::Failed => "failed",
            VerdictSource::Invalid => "invalid",
        }
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verdict together with the tier that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub source: VerdictSource,
}

impl Classification {
    pub fn new(verdict: Verdict, source: VerdictSource) -> Self {
        Self { verdict, source }
    }

    /// True when answering required no network round-trip.
    pub fn is_offline(&self) -> bool {
        matches!(self.source, VerdictSource::Local | VerdictSource::Cache)
    }
}
