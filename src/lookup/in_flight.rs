//! At most one outstanding lookup per hash prefix.
//!
//! The first caller for a prefix starts the query on its own tokio task;
//! later callers get a clone of the same [`PendingLookup`] and observe the
//! identical outcome. The entry is removed when the task settles, success or
//! failure, so the next caller after a failure starts a fresh query. The
//! task keeps running if every caller goes away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use parking_lot::Mutex;

use super::prefix_cache::PrefixEntry;
use crate::error::RemoteError;
use crate::hasher::HashPrefix;

/// Outcome shared by every caller waiting on one prefix.
pub type LookupResult = Result<Arc<PrefixEntry>, RemoteError>;

/// Cloneable handle to an in-flight lookup.
pub type PendingLookup = Shared<BoxFuture<'static, LookupResult>>;

type PendingMap = Arc<Mutex<HashMap<HashPrefix, PendingLookup>>>;

/// Removes the in-flight entry when the query task finishes, even by panic.
struct SettleGuard {
    pending: PendingMap,
    prefix: HashPrefix,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.prefix);
    }
}

/// Result of [`InFlightTracker::get_or_start`].
pub struct Joined {
    pub pending: PendingLookup,
    /// `true` if this caller started the query, `false` if it joined one
    pub started: bool,
}

/// Tracker statistics.
#[derive(Clone, Debug, Default)]
pub struct TrackerStats {
    pub in_flight: usize,
    pub started: u64,
    pub coalesced: u64,
}

/// Coalesces concurrent lookups for the same prefix.
#[derive(Default)]
pub struct InFlightTracker {
    pending: PendingMap,
    started: AtomicU64,
    coalesced: AtomicU64,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the lookup in flight for `prefix`, or start one with `query`.
    ///
    /// `query` is only invoked when nothing is in flight for `prefix`. Must be
    /// called from within a tokio runtime.
    pub fn get_or_start<F, Fut>(&self, prefix: &HashPrefix, query: F) -> Joined
    where
        F: FnOnce(HashPrefix) -> Fut,
        Fut: Future<Output = LookupResult> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(prefix) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Lookup for prefix {} already in flight", prefix);
            return Joined {
                pending: existing.clone(),
                started: false,
            };
        }

        debug!("Starting lookup for prefix {}", prefix);
        let query = query(prefix.clone());
        let guard = SettleGuard {
            pending: Arc::clone(&self.pending),
            prefix: prefix.clone(),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            query.await
        });
        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(RemoteError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        pending.insert(prefix.clone(), shared.clone());
        self.started.fetch_add(1, Ordering::Relaxed);
        Joined {
            pending: shared,
            started: true,
        }
    }

    /// Whether a lookup for `prefix` is outstanding.
    pub fn is_in_flight(&self, prefix: &HashPrefix) -> bool {
        self.pending.lock().contains_key(prefix)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            in_flight: self.len(),
            started: self.started.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
