//! Error taxonomy for the sync and cache layer.
//!
//! Fetch and validation failures are soft: the orchestrator converts them
//! into a fallback write and a successful outcome. Storage failures are
//! hard: if the cache itself is broken the fallback write would fail too,
//! so they always propagate.

use thiserror::Error;

/// Local persistence failure (disk, serialization, schema).
#[derive(Debug, Clone, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError(e.to_string())
  }
}

impl From<serde_json::Error> for StorageError {
  fn from(e: serde_json::Error) -> Self {
    StorageError(format!("row serialization: {}", e))
  }
}

/// Failure of a sync operation.
///
/// Variants carry rendered messages rather than source errors so outcomes
/// can be cloned to every caller coalesced onto one in-flight sync.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
  /// Network or server-side failure (includes timeouts).
  #[error("fetch failed: {0}")]
  Fetch(String),

  /// A response arrived but did not match the expected shape.
  #[error("invalid payload: {0}")]
  Validation(String),

  /// Local persistence failure; never masked by fallback.
  #[error(transparent)]
  Storage(#[from] StorageError),

  /// One or more collections failed during an aggregate sync.
  #[error("aggregate sync failed for: {}", .failed.join("; "))]
  Coordination { failed: Vec<String> },
}

impl SyncError {
  /// Whether the fallback dataset may stand in for this failure.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, SyncError::Fetch(_) | SyncError::Validation(_))
  }
}
