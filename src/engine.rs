//! Classification engine.
//!
//! Answers "should this host be upgraded?" from three tiers, cheapest first:
//! 1. the local host store (exact host or wildcard ancestor),
//! 2. the in-memory prefix cache,
//! 3. a coalesced, timeout-bounded query to the lookup service that sends
//!    only the hash prefix.
//!
//! Lifecycle errors of the local store are surfaced from [`UpgradeEngine::init`].
//! Per-query failures are folded into [`Verdict::Unknown`] and never cached.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{EngineError, RemoteError, StoreError};
use crate::hasher::{self, HashPrefix, DIGEST_HEX_LEN};
use crate::lookup::{
    CacheConfig, CacheStats, InFlightTracker, Joined, PrefixCache, PrefixEntry, TrackerStats,
};
use crate::refresh::{RefreshScheduler, RefreshService, SchedulerConfig};
use crate::remote::{BulkFetcher, HttpBulkFetcher, HttpPrefixLookup, PrefixLookup, RemoteConfig};
use crate::storage::{normalize_host, HostStore, StoreConfig, StoreState};
use crate::telemetry::{EngineObserver, TelemetryConfig, TelemetryRecorder, TelemetryStats};
use crate::types::{Classification, Verdict, VerdictSource};

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Complete engine configuration.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Defaults overlaid with `HTTPS_UPGRADE_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("HTTPS_UPGRADE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("HTTPS_UPGRADE_DB_NAME") {
            config.store.name = name;
        }
        if let Some(version) = env_parse::<u32>("HTTPS_UPGRADE_DB_VERSION")? {
            config.store.version = version;
        }
        if let Ok(url) = std::env::var("HTTPS_UPGRADE_BULK_URL") {
            config.remote.bulk_url = url;
        }
        if let Ok(url) = std::env::var("HTTPS_UPGRADE_LOOKUP_URL") {
            config.remote.lookup_url = url;
        }
        if let Some(ms) = env_parse::<u64>("HTTPS_UPGRADE_TIMEOUT_MS")? {
            config.remote.timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("HTTPS_UPGRADE_REFRESH_SECS")? {
            config.scheduler.refresh_interval = Duration::from_secs(secs);
            config.scheduler.enabled = secs > 0;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.store.version == 0 {
            return Err(EngineError::Config(
                "store version must be a positive integer".to_string(),
            ));
        }
        if self.store.name.is_empty() {
            return Err(EngineError::Config("store name must not be empty".to_string()));
        }
        if !(1..=DIGEST_HEX_LEN).contains(&self.remote.prefix_len) {
            return Err(EngineError::Config(format!(
                "prefix length must be between 1 and {}, got {}",
                DIGEST_HEX_LEN, self.remote.prefix_len
            )));
        }
        if self.remote.timeout.is_zero() {
            return Err(EngineError::Config("remote timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, EngineError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

// ================================================================================================
// ENGINE
// ================================================================================================

/// Point-in-time engine statistics.
#[derive(Clone, Debug)]
pub struct EngineStats {
    pub store_state: StoreState,
    pub cache: CacheStats,
    pub lookups: TrackerStats,
}

/// The HTTPS upgrade classification engine.
///
/// Owns its host store exclusively; build one engine per logical dataset.
pub struct UpgradeEngine {
    config: EngineConfig,
    store: Arc<HostStore>,
    cache: Arc<PrefixCache>,
    tracker: InFlightTracker,
    bulk: Arc<dyn BulkFetcher>,
    lookup: Arc<dyn PrefixLookup>,
    observer: Arc<dyn EngineObserver>,
    /// Set while the default recorder is the observer
    telemetry: Option<Arc<TelemetryRecorder>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UpgradeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeEngine")
            .field("store", &self.store)
            .field("cached_prefixes", &self.cache.len())
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

impl UpgradeEngine {
    /// Build an engine around the given collaborators. Nothing is opened
    /// until [`init`](Self::init).
    pub fn new(
        config: EngineConfig,
        bulk: Arc<dyn BulkFetcher>,
        lookup: Arc<dyn PrefixLookup>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let telemetry = Arc::new(TelemetryRecorder::new(config.telemetry.clone()));
        let observer: Arc<dyn EngineObserver> = telemetry.clone();
        Ok(Self {
            store: Arc::new(HostStore::new(config.store.clone(), Arc::clone(&observer))),
            cache: Arc::new(PrefixCache::new(config.cache.clone())),
            tracker: InFlightTracker::new(),
            bulk,
            lookup,
            observer,
            telemetry: Some(telemetry),
            refresh_task: Mutex::new(None),
            config,
        })
    }

    /// Replace the observability sink. Call before [`init`](Self::init).
    pub fn with_observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.store = Arc::new(HostStore::new(self.config.store.clone(), Arc::clone(&observer)));
        self.observer = observer;
        self.telemetry = None;
        self
    }

    /// Build the HTTP collaborators from `config` and initialize.
    pub async fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let bulk = Arc::new(HttpBulkFetcher::new(&config.remote)?);
        let lookup = Arc::new(HttpPrefixLookup::new(&config.remote)?);
        let engine = Self::new(config, bulk, lookup)?;
        engine.init().await?;
        Ok(engine)
    }

    /// Open (and on first run, populate) the local store, then start the
    /// background refresh if enabled.
    pub async fn init(&self) -> Result<(), EngineError> {
        self.store.open(self.bulk.as_ref()).await?;
        info!(
            "Engine initialized with store '{}' at version {}",
            self.store.name(),
            self.store.version()
        );

        if self.config.scheduler.enabled {
            let mut task = self.refresh_task.lock();
            if task.is_none() {
                let scheduler = Arc::new(RefreshScheduler::new(
                    Arc::new(self.refresh_service()),
                    self.config.scheduler.clone(),
                ));
                *task = Some(tokio::spawn(scheduler.start()));
            }
        }
        Ok(())
    }

    /// Stop background refresh and close the local store.
    pub async fn shutdown(&self) {
        let task = self.refresh_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        self.store.close().await;
        info!("Engine shut down");
    }

    /// Event-driven refresh of the local store from the bulk endpoint.
    pub fn refresh_service(&self) -> RefreshService {
        RefreshService::new(Arc::clone(&self.store), Arc::clone(&self.bulk))
    }

    pub fn store(&self) -> &Arc<HostStore> {
        &self.store
    }

    pub fn cache(&self) -> &PrefixCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store_state: self.store.state(),
            cache: self.cache.stats(),
            lookups: self.tracker.stats(),
        }
    }

    /// Verdict counters of the default recorder; `None` once a custom
    /// observer replaced it.
    pub fn telemetry_stats(&self) -> Option<TelemetryStats> {
        self.telemetry.as_ref().map(|recorder| recorder.stats())
    }

    /// Should `host` be upgraded?
    pub async fn classify(&self, host: &str) -> Verdict {
        self.classify_detailed(host).await.verdict
    }

    /// Like [`classify`](Self::classify), also reporting which tier answered.
    pub async fn classify_detailed(&self, host: &str) -> Classification {
        let classification = self.classify_inner(host).await;
        self.observer.on_classified(host, &classification);
        classification
    }

    /// Network-free probe: `Some(verdict)` if the prefix cache can answer.
    pub fn check_in_cache(&self, host: &str) -> Option<bool> {
        let host = normalize_host(host)?;
        let digest = hasher::digest(&host);
        let prefix = hasher::prefix(&digest, self.config.remote.prefix_len);
        self.cache.check(&prefix, &digest)
    }

    async fn classify_inner(&self, raw_host: &str) -> Classification {
        let host = match normalize_host(raw_host) {
            Some(host) if !host.starts_with("*.") => host,
            _ => return Classification::new(Verdict::Unknown, VerdictSource::Invalid),
        };
        let digest = hasher::digest(&host);
        let prefix = hasher::prefix(&digest, self.config.remote.prefix_len);

        match self.store.find_match(&host).await {
            Ok(Some(record)) if record.simple_upgrade => {
                return Classification::new(Verdict::Upgrade, VerdictSource::Local);
            }
            Ok(_) => {}
            Err(StoreError::NotReady(state)) => {
                debug!("Local store is {:?}, skipping local tier", state);
            }
            Err(e) => warn!("Local lookup failed, falling back to remote: {}", e),
        }

        if let Some(matched) = self.cache.check(&prefix, &digest) {
            return Classification::new(verdict_for(matched), VerdictSource::Cache);
        }

        let joined = self.start_lookup(&prefix);
        let source = if joined.started {
            VerdictSource::Remote
        } else {
            VerdictSource::Coalesced
        };
        match joined.pending.await {
            Ok(entry) => Classification::new(verdict_for(entry.matches(&digest)), source),
            Err(_) => Classification::new(Verdict::Unknown, VerdictSource::Failed),
        }
    }

    /// Join or start the lookup for `prefix`. The started task caches a
    /// successful answer before it leaves the in-flight table.
    fn start_lookup(&self, prefix: &HashPrefix) -> Joined {
        let lookup = Arc::clone(&self.lookup);
        let cache = Arc::clone(&self.cache);
        let observer = Arc::clone(&self.observer);
        let timeout = self.config.remote.timeout;

        self.tracker.get_or_start(prefix, move |prefix| async move {
            let result = match tokio::time::timeout(timeout, lookup.query(&prefix)).await {
                Ok(Ok(digests)) => {
                    let entry = Arc::new(PrefixEntry::from_response(&prefix, digests));
                    cache.store(prefix.clone(), Arc::clone(&entry));
                    Ok(entry)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RemoteError::Timeout(timeout)),
            };
            observer.on_remote_query(&prefix, result.as_ref().map(|entry| entry.len()));
            result
        })
    }
}

fn verdict_for(matched: bool) -> Verdict {
    if matched {
        Verdict::Upgrade
    } else {
        Verdict::NoUpgrade
    }
}
