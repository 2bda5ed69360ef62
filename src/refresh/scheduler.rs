//! Scheduled host store refresh - background task for periodic dataset reloads.
//!
//! The first-run population makes the store usable; after that the bulk
//! dataset keeps growing upstream. The scheduler re-runs
//! [`RefreshService::refresh_now`] on a fixed interval plus random jitter so
//! that many clients started together do not hit the bulk endpoint in lockstep.
//!
//! Failures are logged and the next cycle is attempted on schedule; the
//! store keeps serving the data it already has.

use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::service::RefreshService;
use crate::types::now_ms;
use log::{error, info};

/// Configuration for the scheduled refresh service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh operations
    pub refresh_interval: Duration,
    /// Upper bound of the random delay added to each interval
    pub jitter: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            jitter: Duration::from_secs(10 * 60),
            enabled: false,
        }
    }
}

/// Scheduler for periodic host store refresh.
///
/// Spawned by `UpgradeEngine::init` when enabled and aborted on shutdown.
pub struct RefreshScheduler {
    service: Arc<RefreshService>,
    config: SchedulerConfig,
    /// Timestamp of the last successful refresh
    last_refresh_at: Arc<RwLock<u64>>,
}

impl RefreshScheduler {
    pub fn new(service: Arc<RefreshService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            last_refresh_at: Arc::new(RwLock::new(now_ms())),
        }
    }

    /// Milliseconds since UNIX epoch of the last successful refresh, or
    /// creation time if none has happened yet.
    pub fn last_refresh(&self) -> u64 {
        *self.last_refresh_at.read()
    }

    /// Delay before the next cycle: the interval plus up to `jitter`.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.refresh_interval + Duration::from_millis(extra)
    }

    /// Runs indefinitely; spawn it as a tokio task. Returns immediately when
    /// disabled.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Scheduled refresh is disabled, skipping");
            return;
        }

        info!(
            "Starting scheduled refresh with {}-second interval",
            self.config.refresh_interval.as_secs()
        );

        loop {
            tokio::time::sleep(self.next_delay()).await;
            self.do_refresh().await;
        }
    }

    /// Executes one refresh cycle, logging instead of propagating errors.
    async fn do_refresh(&self) {
        match self.service.refresh_now().await {
            Ok(stats) => {
                info!(
                    "Scheduled refresh completed: {} hosts refreshed in {}ms",
                    stats.hosts_refreshed, stats.duration_ms
                );
                *self.last_refresh_at.write() = now_ms();
            }
            Err(e) => {
                error!("Scheduled refresh failed: {}", e);
            }
        }
    }
}
