//! reqwest-backed clients for the bulk dataset and prefix lookup endpoints.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use super::{BulkDataset, BulkFetcher, PrefixLookup};
use crate::error::{EngineError, RemoteError};
use crate::hasher::{HashPrefix, HASH_PREFIX_SIZE};

/// Query parameter carrying the hash prefix.
pub const PREFIX_QUERY_PARAM: &str = "pv1";

/// Configuration for remote endpoints.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Bulk dataset endpoint, fetched on first-run population and refresh
    pub bulk_url: String,
    /// Prefix lookup endpoint
    pub lookup_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Hex characters of the digest sent to the lookup service
    pub prefix_len: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bulk_url: "http://localhost:8080/collect.js?type=httpse".to_string(),
            lookup_url: "http://localhost:8080/https-lookup".to_string(),
            timeout: Duration::from_secs(5),
            prefix_len: HASH_PREFIX_SIZE,
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::Client(e.to_string()))
}

/// Fetches the bulk dataset over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBulkFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpBulkFetcher {
    pub fn new(config: &RemoteConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            url: config.bulk_url.clone(),
        })
    }
}

#[async_trait]
impl BulkFetcher for HttpBulkFetcher {
    async fn fetch_bulk(&self) -> Result<BulkDataset, RemoteError> {
        info!("Fetching bulk host dataset from {}", self.url);
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

/// Queries the prefix lookup service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPrefixLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpPrefixLookup {
    pub fn new(config: &RemoteConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            url: config.lookup_url.clone(),
        })
    }
}

#[async_trait]
impl PrefixLookup for HttpPrefixLookup {
    async fn query(&self, prefix: &HashPrefix) -> Result<Vec<String>, RemoteError> {
        debug!("Querying lookup service for prefix {}", prefix);
        let response = self
            .client
            .get(&self.url)
            .query(&[(PREFIX_QUERY_PARAM, prefix.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
