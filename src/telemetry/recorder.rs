//! # Telemetry Recorder
//!
//! Default [`EngineObserver`]: logs through `log` and keeps thread-safe counters.

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

use super::observer::EngineObserver;
use crate::error::{RemoteError, StoreError};
use crate::hasher::HashPrefix;
use crate::storage::StoreState;
use crate::types::{Classification, Verdict, VerdictSource};

/// Configuration for telemetry recording
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Enable counters and logging
    pub enabled: bool,

    /// Log every verdict at debug level (includes the host name)
    pub log_verdicts: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            enabled: true,
            log_verdicts: false,
        }
    }
}

/// Thread-safe telemetry recorder
pub struct TelemetryRecorder {
    config: TelemetryConfig,
    counters: Arc<RwLock<TelemetryStats>>,
}

impl TelemetryRecorder {
    pub fn new(config: TelemetryConfig) -> Self {
        TelemetryRecorder {
            config,
            counters: Arc::new(RwLock::new(TelemetryStats::default())),
        }
    }

    /// Get telemetry statistics
    pub fn stats(&self) -> TelemetryStats {
        self.counters.read().clone()
    }

    /// Check if telemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

impl EngineObserver for TelemetryRecorder {
    fn on_store_state(&self, store: &str, state: StoreState) {
        if !self.config.enabled {
            return;
        }
        match state {
            StoreState::Failed => warn!("Host store '{}' entered Failed state", store),
            _ => info!("Host store '{}' is now {:?}", store, state),
        }
    }

    fn on_classified(&self, host: &str, classification: &Classification) {
        if !self.config.enabled {
            return;
        }
        if self.config.log_verdicts {
            debug!(
                "{} -> {} (via {})",
                host, classification.verdict, classification.source
            );
        }

        let mut counters = self.counters.write();
        counters.total_classified += 1;
        match classification.verdict {
            Verdict::Upgrade => counters.upgrades += 1,
            Verdict::NoUpgrade => counters.no_upgrades += 1,
            Verdict::Unknown => counters.unknowns += 1,
        }
        match classification.source {
            VerdictSource::Local => counters.local_hits += 1,
            VerdictSource::Cache => counters.cache_hits += 1,
            _ => {}
        }
    }

    fn on_remote_query(&self, prefix: &HashPrefix, outcome: Result<usize, &RemoteError>) {
        if !self.config.enabled {
            return;
        }
        let mut counters = self.counters.write();
        counters.remote_queries += 1;
        match outcome {
            Ok(matches) => debug!("Prefix {} returned {} matching digests", prefix, matches),
            Err(e) => {
                counters.remote_failures += 1;
                warn!("Lookup for prefix {} failed: {}", prefix, e);
            }
        }
    }

    fn on_write_failed(&self, host: &str, error: &StoreError) {
        if !self.config.enabled {
            return;
        }
        self.counters.write().write_failures += 1;
        warn!("Dropped write for '{}': {}", host, error);
    }
}

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct TelemetryStats {
    pub total_classified: u64,
    pub upgrades: u64,
    pub no_upgrades: u64,
    pub unknowns: u64,
    pub local_hits: u64,
    pub cache_hits: u64,
    pub remote_queries: u64,
    pub remote_failures: u64,
    pub write_failures: u64,
}

impl TelemetryStats {
    pub fn upgrade_rate(&self) -> f64 {
        if self.total_classified == 0 {
            0.0
        } else {
            self.upgrades as f64 / self.total_classified as f64
        }
    }

    /// Share of classifications answered without a network round-trip.
    pub fn offline_rate(&self) -> f64 {
        if self.total_classified == 0 {
            0.0
        } else {
            (self.local_hits + self.cache_hits) as f64 / self.total_classified as f64
        }
    }
}
