//! Host store refresh - keep the local dataset current after first-run population.
//!
//! Provides two refresh mechanisms:
//! 1. **Event-driven refresh** (RefreshService): run on demand
//! 2. **Scheduled refresh** (RefreshScheduler): periodic background task (24-hour default)

pub mod scheduler;
pub mod service;

pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use service::{RefreshService, RefreshStats};
