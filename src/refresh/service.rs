//! Event-driven refresh of the local host store.
//!
//! Re-fetches the bulk dataset and overwrites the matching records through
//! the store's write queue. Records are never deleted here.

use std::sync::Arc;

use log::{info, warn};

use crate::error::{RefreshError, StoreError};
use crate::remote::BulkFetcher;
use crate::storage::{normalize_host, HostRecord, HostStore};
use crate::types::now_ms;

/// Statistics from a refresh operation.
#[derive(Debug, Clone)]
pub struct RefreshStats {
    /// Number of hosts written
    pub hosts_refreshed: usize,
    /// Entries skipped because they were not valid hosts
    pub hosts_skipped: usize,
    /// Duration of refresh operation in milliseconds
    pub duration_ms: u64,
    /// Timestamp of refresh
    pub timestamp: u64,
}

/// Host store refresh service.
pub struct RefreshService {
    store: Arc<HostStore>,
    bulk: Arc<dyn BulkFetcher>,
}

impl RefreshService {
    pub fn new(store: Arc<HostStore>, bulk: Arc<dyn BulkFetcher>) -> Self {
        Self { store, bulk }
    }

    /// Fetch the bulk dataset and write every host into the store.
    ///
    /// Returns once all writes have been applied or reported as failed.
    /// The store must be `Ready`.
    pub async fn refresh_now(&self) -> Result<RefreshStats, RefreshError> {
        let state = self.store.state();
        if !state.is_ready() {
            return Err(StoreError::NotReady(state).into());
        }
        let start = now_ms();

        let dataset = self.bulk.fetch_bulk().await?;
        let mut refreshed = 0;
        let mut skipped = 0;
        for raw in dataset.simple_upgrade {
            match normalize_host(&raw) {
                Some(host) => {
                    self.store.put(HostRecord::upgrade(host));
                    refreshed += 1;
                }
                None => {
                    warn!("Skipping invalid host in refresh dataset: {:?}", raw);
                    skipped += 1;
                }
            }
        }
        self.store.flush().await?;

        let duration_ms = now_ms().saturating_sub(start);
        info!(
            "Refreshed {} hosts into '{}' in {}ms",
            refreshed,
            self.store.name(),
            duration_ms
        );

        Ok(RefreshStats {
            hosts_refreshed: refreshed,
            hosts_skipped: skipped,
            duration_ms,
            timestamp: now_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::BulkDataset;
    use crate::storage::{StoreConfig, StoreState};
    use crate::telemetry::NoopObserver;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Serves a different dataset on each call.
    struct SequenceFetcher {
        datasets: Mutex<Vec<Result<BulkDataset, RemoteError>>>,
    }

    impl SequenceFetcher {
        fn new(datasets: Vec<Result<BulkDataset, RemoteError>>) -> Self {
            let mut datasets = datasets;
            datasets.reverse();
            Self {
                datasets: Mutex::new(datasets),
            }
        }
    }

    #[async_trait]
    impl BulkFetcher for SequenceFetcher {
        async fn fetch_bulk(&self) -> Result<BulkDataset, RemoteError> {
            self.datasets
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(BulkDataset::default()))
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> Arc<HostStore> {
        Arc::new(HostStore::new(
            StoreConfig {
                data_dir: dir.path().to_path_buf(),
                name: "refresh".to_string(),
                version: 1,
            },
            Arc::new(NoopObserver),
        ))
    }

    #[tokio::test]
    async fn test_refresh_adds_new_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let fetcher = Arc::new(SequenceFetcher::new(vec![
            Ok(BulkDataset::new(["example.com"])),
            Ok(BulkDataset::new(["example.com", "fresh.example", "not valid"])),
        ]));
        store.open(fetcher.as_ref()).await.unwrap();
        assert!(store.get("fresh.example").await.unwrap().is_none());

        let service = RefreshService::new(Arc::clone(&store), fetcher);
        let stats = service.refresh_now().await.unwrap();
        assert_eq!(stats.hosts_refreshed, 2);
        assert_eq!(stats.hosts_skipped, 1);
        assert!(store.get("fresh.example").await.unwrap().unwrap().simple_upgrade);
    }

    #[tokio::test]
    async fn test_refresh_fetch_failure_leaves_store_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let fetcher = Arc::new(SequenceFetcher::new(vec![
            Ok(BulkDataset::new(["example.com"])),
            Err(RemoteError::Status(500)),
        ]));
        store.open(fetcher.as_ref()).await.unwrap();

        let service = RefreshService::new(Arc::clone(&store), fetcher);
        let err = service.refresh_now().await.unwrap_err();
        assert!(matches!(err, RefreshError::Fetch(RemoteError::Status(500))));
        assert_eq!(store.state(), StoreState::Ready);
        assert!(store.get("example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_requires_ready_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let service = RefreshService::new(store, Arc::new(SequenceFetcher::new(vec![])));
        let err = service.refresh_now().await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Store(StoreError::NotReady(StoreState::Unopened))
        ));
    }
}
