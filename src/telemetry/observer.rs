//! Observability sink injected into the store and engine.

use crate::error::{RemoteError, StoreError};
use crate::hasher::HashPrefix;
use crate::storage::StoreState;
use crate::types::Classification;

/// Receives lifecycle and outcome events. Every hook defaults to a no-op.
///
/// Hooks are called inline on the hot path and must not block.
pub trait EngineObserver: Send + Sync {
    /// The named store moved to `state`.
    fn on_store_state(&self, _store: &str, _state: StoreState) {}

    /// A classification finished.
    fn on_classified(&self, _host: &str, _classification: &Classification) {}

    /// A remote query for `prefix` settled with the number of matching
    /// digests, or an error. Called once per query, not per caller.
    fn on_remote_query(&self, _prefix: &HashPrefix, _outcome: Result<usize, &RemoteError>) {}

    /// A fire-and-forget write was lost.
    fn on_write_failed(&self, _host: &str, _error: &StoreError) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}
