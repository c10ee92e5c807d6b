//! Scripted remote fetcher for engine tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::entity::{EntityKind, SyncEntity};
use crate::error::SyncError;
use crate::remote::{RemoteFetcher, SyncBundle};

/// Serves canned JSON per kind, or fails every call with a fixed error.
/// Kinds without scripted rows return an empty list (a successful fetch).
pub struct ScriptFetcher {
  rows: HashMap<EntityKind, serde_json::Value>,
  bundle: Option<SyncBundle>,
  fail_with: Option<SyncError>,
  delay: Duration,
  calls: AtomicUsize,
}

impl ScriptFetcher {
  pub fn ok() -> Self {
    Self {
      rows: HashMap::new(),
      bundle: None,
      fail_with: None,
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn failing(error: SyncError) -> Self {
    Self {
      fail_with: Some(error),
      ..Self::ok()
    }
  }

  pub fn with_rows(mut self, kind: EntityKind, rows: serde_json::Value) -> Self {
    self.rows.insert(kind, rows);
    self
  }

  pub fn with_bundle(mut self, bundle: SyncBundle) -> Self {
    self.bundle = Some(bundle);
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn fetch_calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteFetcher for ScriptFetcher {
  async fn fetch<T: SyncEntity>(
    &self,
    _user_id: i64,
    _year: Option<&str>,
  ) -> Result<Vec<T>, SyncError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    if let Some(error) = &self.fail_with {
      return Err(error.clone());
    }

    let value = self
      .rows
      .get(&T::KIND)
      .cloned()
      .unwrap_or_else(|| serde_json::json!([]));
    serde_json::from_value(value)
      .map_err(|e| SyncError::Validation(format!("scripted {} rows: {}", T::KIND, e)))
  }

  async fn fetch_bundle(&self, _user_id: i64, _year: &str) -> Result<SyncBundle, SyncError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    if let Some(error) = &self.fail_with {
      return Err(error.clone());
    }
    Ok(self.bundle.clone().unwrap_or_default())
  }
}
