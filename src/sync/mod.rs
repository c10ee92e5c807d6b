//! Sync orchestration: pull collections from the remote API into the cache.
//!
//! [`SyncEngine::sync`] handles one collection; the coordinator methods run
//! all of them, either concurrently against the per-kind endpoints or
//! sequentially off the composite endpoint. Fetch and validation failures
//! degrade to the bundled fallback dataset under the default policy, so a
//! sync only truly fails when local storage does.

mod coordinator;
mod syncer;

#[cfg(test)]
pub mod testing;

pub use coordinator::SyncReport;
pub use syncer::{SyncEngine, SyncOutcome};
