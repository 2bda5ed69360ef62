//! Local host store.
//!
//! - **schema**: versioned SQLite schema and migrations
//! - **host_store**: async handle with open/migrate/populate lifecycle,
//!   point lookups, wildcard matching and a fire-and-forget write queue
//! - **types**: host records, lifecycle states, key normalisation

pub mod host_store;
pub mod schema;
pub mod types;

pub use host_store::{HostStore, StoreConfig};
pub use schema::LATEST_SCHEMA_VERSION;
pub use types::{match_candidates, normalize_host, HostRecord, StoreState, StoreStats};
