//! End-to-end classification through all three tiers, with in-process
//! collaborators standing in for the bulk endpoint and the lookup service.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use https_upgrade::hasher::{self, HASH_PREFIX_SIZE};
use https_upgrade::{
    BulkDataset, BulkFetcher, Classification, EngineConfig, EngineError, EngineObserver,
    HashPrefix, HostDigest, PrefixLookup, RemoteError, StoreError, StoreState, UpgradeEngine,
    Verdict, VerdictSource,
};

struct StaticBulk {
    hosts: Vec<String>,
    fail: bool,
}

impl StaticBulk {
    fn new(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            hosts: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl BulkFetcher for StaticBulk {
    async fn fetch_bulk(&self) -> Result<BulkDataset, RemoteError> {
        if self.fail {
            return Err(RemoteError::Status(503));
        }
        Ok(BulkDataset::new(self.hosts.iter().cloned()))
    }
}

/// Lookup service answering from a fixed set of upgrade-worthy hosts.
#[derive(Default)]
struct MockLookup {
    upgradable: Vec<HostDigest>,
    calls: AtomicUsize,
    fail: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl MockLookup {
    fn serving(hosts: &[&str]) -> Self {
        Self {
            upgradable: hosts.iter().map(|h| hasher::digest(h)).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrefixLookup for MockLookup {
    async fn query(&self, prefix: &HashPrefix) -> Result<Vec<String>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| RemoteError::Aborted(e.to_string()))?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        Ok(self
            .upgradable
            .iter()
            .filter(|digest| prefix.covers(digest))
            .map(|digest| digest.to_string())
            .collect())
    }
}

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.store.data_dir = dir.path().to_path_buf();
    config.remote.timeout = Duration::from_millis(500);
    config
}

async fn engine(dir: &TempDir, bulk: Arc<StaticBulk>, lookup: Arc<MockLookup>) -> UpgradeEngine {
    let engine = UpgradeEngine::new(config(dir), bulk, lookup).unwrap();
    engine.init().await.unwrap();
    engine
}

fn prefix_of(host: &str) -> HashPrefix {
    hasher::prefix(&hasher::digest(host), HASH_PREFIX_SIZE)
}

/// A host distinct from `host` whose digest shares its prefix.
fn prefix_sibling(host: &str) -> String {
    let target = prefix_of(host);
    (0u64..)
        .map(|i| format!("sibling{i}.example"))
        .find(|candidate| candidate != host && prefix_of(candidate) == target)
        .unwrap()
}

#[tokio::test]
async fn local_host_is_answered_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::default());
    let engine = engine(&dir, StaticBulk::new(&["example.com"]), lookup.clone()).await;

    let c = engine.classify_detailed("Example.COM.").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Local));
    assert_eq!(lookup.calls(), 0);
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn remote_match_is_upgraded_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::serving(&["secure.example"]));
    let engine = engine(&dir, StaticBulk::new(&[]), lookup.clone()).await;

    let c = engine.classify_detailed("secure.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Remote));
    assert!(engine.cache().contains(&prefix_of("secure.example")));
    assert_eq!(engine.check_in_cache("secure.example"), Some(true));

    let c = engine.classify_detailed("secure.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Cache));
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn remote_miss_is_no_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::default());
    let engine = engine(&dir, StaticBulk::new(&[]), lookup.clone()).await;

    assert_eq!(engine.classify("plain.example").await, Verdict::NoUpgrade);
    assert_eq!(engine.check_in_cache("plain.example"), Some(false));
}

#[tokio::test]
async fn shared_prefix_does_not_imply_a_match() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::serving(&["secure.example"]));
    let engine = engine(&dir, StaticBulk::new(&[]), lookup.clone()).await;
    let sibling = prefix_sibling("secure.example");

    assert_eq!(engine.classify("secure.example").await, Verdict::Upgrade);
    let c = engine.classify_detailed(&sibling).await;
    assert_eq!(c, Classification::new(Verdict::NoUpgrade, VerdictSource::Cache));
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn transport_failure_is_unknown_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::serving(&["secure.example"]));
    lookup.fail.store(true, Ordering::SeqCst);
    let engine = engine(&dir, StaticBulk::new(&[]), lookup.clone()).await;

    let c = engine.classify_detailed("secure.example").await;
    assert_eq!(c, Classification::new(Verdict::Unknown, VerdictSource::Failed));
    assert!(!c.is_offline());
    assert!(engine.cache().is_empty());
    assert_eq!(engine.check_in_cache("secure.example"), None);

    // The failure is not remembered: the next call asks again.
    lookup.fail.store(false, Ordering::SeqCst);
    let c = engine.classify_detailed("secure.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Remote));
    assert_eq!(lookup.calls(), 2);
}

#[tokio::test]
async fn slow_lookup_times_out_as_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup {
        delay: Some(Duration::from_secs(30)),
        ..MockLookup::serving(&["slow.example"])
    });
    let mut config = config(&dir);
    config.remote.timeout = Duration::from_millis(50);
    let engine = UpgradeEngine::new(config, StaticBulk::new(&[]), lookup.clone()).unwrap();
    engine.init().await.unwrap();

    let c = engine.classify_detailed("slow.example").await;
    assert_eq!(c, Classification::new(Verdict::Unknown, VerdictSource::Failed));
    assert!(engine.cache().is_empty());
    assert_eq!(engine.stats().lookups.in_flight, 0);
}

#[tokio::test]
async fn concurrent_lookups_for_one_prefix_are_coalesced() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let lookup = Arc::new(MockLookup {
        gate: Some(Arc::clone(&gate)),
        ..MockLookup::serving(&["busy.example"])
    });
    let engine = engine(&dir, StaticBulk::new(&[]), lookup.clone()).await;
    let sibling = prefix_sibling("busy.example");

    let release = async {
        while engine.stats().lookups.coalesced < 2 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);
    };
    let (a, b, c, ()) = tokio::join!(
        engine.classify_detailed("busy.example"),
        engine.classify_detailed("busy.example"),
        engine.classify_detailed(&sibling),
        release
    );

    assert_eq!(lookup.calls(), 1);
    assert_eq!(a.verdict, Verdict::Upgrade);
    assert_eq!(b.verdict, Verdict::Upgrade);
    assert_eq!(c.verdict, Verdict::NoUpgrade);

    // Whichever caller got past the local tier first started the query.
    let sources = [a.source, b.source, c.source];
    let started = sources.iter().filter(|s| **s == VerdictSource::Remote).count();
    let joined = sources.iter().filter(|s| **s == VerdictSource::Coalesced).count();
    assert_eq!((started, joined), (1, 2));
    assert_eq!(engine.stats().lookups.started, 1);
    assert_eq!(engine.stats().lookups.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_callers_share_one_query_on_multi_thread_runtime() {
    const CALLERS: usize = 64;

    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let lookup = Arc::new(MockLookup {
        gate: Some(Arc::clone(&gate)),
        ..MockLookup::serving(&["mt.example"])
    });
    let mut config = config(&dir);
    config.remote.timeout = Duration::from_secs(10);
    let engine = Arc::new(UpgradeEngine::new(config, StaticBulk::new(&[]), lookup.clone()).unwrap());
    engine.init().await.unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.classify_detailed("mt.example").await })
        })
        .collect();

    // Hold the query until every caller has joined it.
    while engine.stats().lookups.coalesced < (CALLERS - 1) as u64 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    gate.add_permits(1);

    let mut started = 0;
    for handle in handles {
        let c = handle.await.unwrap();
        assert_eq!(c.verdict, Verdict::Upgrade);
        if c.source == VerdictSource::Remote {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(lookup.calls(), 1);
    assert_eq!(engine.stats().lookups.started, 1);
    assert_eq!(engine.stats().lookups.in_flight, 0);
}

#[tokio::test]
async fn wildcard_records_cover_subdomains_only() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(MockLookup::default());
    let engine = engine(&dir, StaticBulk::new(&["*.wild.example"]), lookup.clone()).await;

    let c = engine.classify_detailed("a.b.wild.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Local));
    assert_eq!(lookup.calls(), 0);

    let c = engine.classify_detailed("wild.example").await;
    assert_eq!(c, Classification::new(Verdict::NoUpgrade, VerdictSource::Remote));
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn failed_population_surfaces_from_init() {
    let dir = tempfile::tempdir().unwrap();
    let engine = UpgradeEngine::new(
        config(&dir),
        StaticBulk::failing(),
        Arc::new(MockLookup::serving(&["secure.example"])),
    )
    .unwrap();

    let err = engine.init().await.unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::PopulationFailed(_))));
    assert_eq!(engine.stats().store_state, StoreState::Failed);

    // The handle stays failed; classification still works through the remote tier.
    assert!(matches!(
        engine.init().await,
        Err(EngineError::Store(StoreError::Failed))
    ));
    assert_eq!(engine.classify("secure.example").await, Verdict::Upgrade);
}

#[tokio::test]
async fn populated_store_survives_restart_without_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let first = engine(&dir, StaticBulk::new(&["kept.example"]), Arc::new(MockLookup::default())).await;
    first.shutdown().await;
    assert_eq!(first.stats().store_state, StoreState::Closed);

    let lookup = Arc::new(MockLookup::default());
    let second = engine(&dir, StaticBulk::failing(), lookup.clone()).await;
    let c = second.classify_detailed("kept.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Local));
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn refresh_adds_hosts_to_local_tier() {
    let dir = tempfile::tempdir().unwrap();
    let first = engine(&dir, StaticBulk::new(&[]), Arc::new(MockLookup::default())).await;
    first.shutdown().await;

    let lookup = Arc::new(MockLookup::default());
    let engine = engine(&dir, StaticBulk::new(&["late.example"]), lookup.clone()).await;
    let stats = engine.refresh_service().refresh_now().await.unwrap();
    assert_eq!(stats.hosts_refreshed, 1);

    let c = engine.classify_detailed("late.example").await;
    assert_eq!(c, Classification::new(Verdict::Upgrade, VerdictSource::Local));
    assert_eq!(lookup.calls(), 0);
}

#[derive(Default)]
struct RecordingObserver {
    classified: Mutex<Vec<(String, Classification)>>,
    queries: AtomicUsize,
}

impl EngineObserver for RecordingObserver {
    fn on_classified(&self, host: &str, classification: &Classification) {
        self.classified
            .lock()
            .push((host.to_string(), *classification));
    }

    fn on_remote_query(&self, _prefix: &HashPrefix, _result: Result<usize, &RemoteError>) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn observer_sees_every_classification() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let engine = UpgradeEngine::new(
        config(&dir),
        StaticBulk::new(&["local.example"]),
        Arc::new(MockLookup::default()),
    )
    .unwrap()
    .with_observer(observer.clone());
    engine.init().await.unwrap();

    engine.classify("local.example").await;
    engine.classify("remote.example").await;
    engine.classify("not a host").await;

    let classified = observer.classified.lock().clone();
    let sources: Vec<VerdictSource> = classified.iter().map(|(_, c)| c.source).collect();
    assert_eq!(
        sources,
        vec![VerdictSource::Local, VerdictSource::Remote, VerdictSource::Invalid]
    );
    assert_eq!(observer.queries.load(Ordering::SeqCst), 1);
}
