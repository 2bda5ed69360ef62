//! Remote collaborators: the bulk dataset endpoint and the prefix lookup service.
//!
//! Both are traits so the store and engine can be driven by in-process
//! fakes; [`HttpBulkFetcher`] and [`HttpPrefixLookup`] are the reqwest-backed
//! production implementations.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::hasher::HashPrefix;

pub use client::{HttpBulkFetcher, HttpPrefixLookup, RemoteConfig};

/// Payload of the bulk dataset endpoint.
///
/// A missing `simpleUpgrade` field is an empty dataset, not an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDataset {
    #[serde(rename = "simpleUpgrade", default)]
    pub simple_upgrade: Vec<String>,
}

impl BulkDataset {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            simple_upgrade: hosts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.simple_upgrade.is_empty()
    }
}

/// Fetches the full list of upgrade-worthy hosts.
#[async_trait]
pub trait BulkFetcher: Send + Sync {
    async fn fetch_bulk(&self) -> Result<BulkDataset, RemoteError>;
}

/// Asks the lookup service which full digests under `prefix` are upgrade-worthy.
///
/// Implementations must send nothing but the prefix.
#[async_trait]
pub trait PrefixLookup: Send + Sync {
    async fn query(&self, prefix: &HashPrefix) -> Result<Vec<String>, RemoteError>;
}
