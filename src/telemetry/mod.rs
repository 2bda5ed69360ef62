//! # Telemetry Module
//!
//! Injectable observability for the classification engine:
//! - Store lifecycle transitions
//! - Verdicts and the tier that produced them
//! - Remote query outcomes (prefix only, never the host)
//! - Lost fire-and-forget writes

pub mod observer;
pub mod recorder;

pub use observer::{EngineObserver, NoopObserver};
pub use recorder::{TelemetryConfig, TelemetryRecorder, TelemetryStats};
