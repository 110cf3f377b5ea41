//! # toska-store
//!
//! The Toska storage engine: a durable string-to-string key/value store with
//! TTL support, crash recovery via an append-only log (AOF), periodic full
//! snapshots, and log compaction.
//!
//! Write path: coordinator (serialized) → index update + AOF append.
//! Reads go straight to the index and never take the writer path, so the AOF
//! byte order always matches the order of visible index updates.

#![warn(missing_docs)]

pub mod aof;
pub mod canonical;
pub mod config;
pub mod error;
pub mod index;
pub mod record;
pub mod snapshot;
pub mod store;

pub use config::{StoreConfig, SyncMode};
pub use error::{Result, StoreError};
pub use index::{Entry, Index};
pub use record::{AofOp, AofRecord};
pub use store::{ReplicationInfo, Store, StoreStats};

/// Current version of the toska-store crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version written into AOF records and snapshot files.
pub const SCHEMA_VERSION: u32 = 1;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
