//! Durable local cache for synced collections.
//!
//! This module owns the only shared mutable state in the app:
//! - Rows live in SQLite, keyed by `(kind, user_id, year, row_key)`
//! - Writes are transactional; replace-for-partition is the only legal
//!   bulk mutation for partitioned kinds
//! - Every committed write bumps a per-`(kind, partition)` version channel
//!   that read subscriptions hang off

mod store;
mod watch;

pub use store::CacheStore;
