//! In-memory cache of lookup-service answers, keyed by hash prefix.
//!
//! An entry is the complete set of upgrade-worthy digests for its prefix.
//! A prefix being cached does not mean a host matches: only membership of
//! the host's full digest does. Entries are replaced wholesale, never merged.
//!
//! Unbounded with no expiry by default; [`CacheConfig`] can add a TTL
//! (checked on read) and a capacity (oldest entry evicted on insert).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::RwLock;

use crate::hasher::{HashPrefix, HostDigest};

/// Configuration for the prefix cache.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Entries older than this are treated as a miss
    pub ttl: Option<Duration>,
    /// Maximum number of prefixes held
    pub max_entries: Option<usize>,
}

/// The lookup service's answer for one prefix.
#[derive(Clone, Debug)]
pub struct PrefixEntry {
    matching: HashSet<HostDigest>,
    fetched_at: Instant,
}

impl PrefixEntry {
    pub fn new<I>(matching: I) -> Self
    where
        I: IntoIterator<Item = HostDigest>,
    {
        Self {
            matching: matching.into_iter().collect(),
            fetched_at: Instant::now(),
        }
    }

    /// Build an entry from a raw service response.
    ///
    /// Digests outside `prefix` or not 40-char hex are dropped.
    pub fn from_response(prefix: &HashPrefix, digests: Vec<String>) -> Self {
        let total = digests.len();
        let entry = Self::new(
            digests
                .iter()
                .filter_map(|raw| HostDigest::from_hex(raw))
                .filter(|digest| prefix.covers(digest)),
        );
        if entry.len() != total {
            warn!(
                "Dropped {} malformed digests from response for prefix {}",
                total - entry.len(),
                prefix
            );
        }
        entry
    }

    /// Membership test by full digest.
    pub fn matches(&self, digest: &HostDigest) -> bool {
        self.matching.contains(digest)
    }

    pub fn len(&self) -> usize {
        self.matching.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matching.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Prefix cache statistics.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

/// Thread-safe prefix cache.
#[derive(Debug, Default)]
pub struct PrefixCache {
    config: CacheConfig,
    entries: RwLock<HashMap<HashPrefix, Arc<PrefixEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl PrefixCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Cached answer for `prefix`, or `None` if the service must be asked.
    pub fn lookup(&self, prefix: &HashPrefix) -> Option<Arc<PrefixEntry>> {
        let entry = self.entries.read().get(prefix).cloned();
        match entry {
            Some(entry) if self.is_expired(&entry) => {
                let mut entries = self.entries.write();
                // Only drop it if nobody replaced it in the meantime.
                if entries.get(prefix).map_or(false, |e| Arc::ptr_eq(e, &entry)) {
                    entries.remove(prefix);
                }
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Membership of `digest` under `prefix`; `None` on a cache miss.
    pub fn check(&self, prefix: &HashPrefix, digest: &HostDigest) -> Option<bool> {
        self.lookup(prefix).map(|entry| entry.matches(digest))
    }

    /// Replace whatever is cached for `prefix`.
    pub fn store(&self, prefix: HashPrefix, entry: Arc<PrefixEntry>) {
        let mut entries = self.entries.write();
        if let Some(max) = self.config.max_entries {
            if !entries.contains_key(&prefix) && entries.len() >= max.max(1) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.fetched_at)
                    .map(|(p, _)| p.clone());
                if let Some(oldest) = oldest {
                    debug!("Evicting prefix {} from cache", oldest);
                    entries.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        entries.insert(prefix, entry);
    }

    pub fn contains(&self, prefix: &HashPrefix) -> bool {
        self.entries.read().contains_key(prefix)
    }

    pub fn remove(&self, prefix: &HashPrefix) -> Option<Arc<PrefixEntry>> {
        self.entries.write().remove(prefix)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &PrefixEntry) -> bool {
        self.config.ttl.map_or(false, |ttl| entry.age() >= ttl)
    }
}
