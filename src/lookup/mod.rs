//! Remote lookup layer: per-prefix answer cache and in-flight query coalescing.

pub mod in_flight;
pub mod prefix_cache;

pub use in_flight::{InFlightTracker, Joined, LookupResult, PendingLookup, TrackerStats};
pub use prefix_cache::{CacheConfig, CacheStats, PrefixCache, PrefixEntry};
