//! Per-collection sync orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::FallbackPolicy;
use crate::entity::{
  Account, ClosingBalance, EntityKind, ExpiryItem, LedgerEntry, OutstandingBill, Partition,
  PriceEntry, SalePurchase, StockItem, SyncEntity, Template, User,
};
use crate::error::SyncError;
use crate::fallback;
use crate::remote::{RemoteFetcher, SyncBundle};

/// Outcome of one `sync(kind, partition)` call.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
  pub kind: EntityKind,
  /// Rows persisted by this sync.
  pub rows: usize,
  /// Whether the bundled dataset stood in for a failed fetch.
  pub used_fallback: bool,
  /// The fetch failure the fallback masked, when it did.
  pub fallback_cause: Option<String>,
}

impl SyncOutcome {
  fn fresh(kind: EntityKind, rows: usize) -> Self {
    Self {
      kind,
      rows,
      used_fallback: false,
      fallback_cause: None,
    }
  }

  fn fallback(kind: EntityKind, rows: usize, cause: &SyncError) -> Self {
    Self {
      kind,
      rows,
      used_fallback: true,
      fallback_cause: Some(cause.to_string()),
    }
  }
}

type SharedOutcome = Result<SyncOutcome, SyncError>;
type InFlightKey = (EntityKind, Partition);
type InFlightMap = HashMap<InFlightKey, watch::Receiver<Option<SharedOutcome>>>;

/// Composes the remote fetcher and the cache store into sync operations.
///
/// At most one sync runs per `(kind, partition)`: a request issued while
/// one is in flight awaits that sync's outcome instead of racing a second
/// transaction against the same partition.
pub struct SyncEngine<R: RemoteFetcher> {
  store: Arc<CacheStore>,
  remote: R,
  policy: FallbackPolicy,
  in_flight: Mutex<InFlightMap>,
}

impl<R: RemoteFetcher> SyncEngine<R> {
  pub fn new(store: Arc<CacheStore>, remote: R, policy: FallbackPolicy) -> Self {
    Self {
      store,
      remote,
      policy,
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Sync one collection for `(user_id, year)`.
  ///
  /// Fetches from the remote, persists on success (upsert for global kinds,
  /// replace-for-partition otherwise), and on a fetch or validation failure
  /// applies the configured fallback policy. Storage failures propagate.
  pub async fn sync<T: SyncEntity>(
    &self,
    user_id: i64,
    year: &str,
  ) -> Result<SyncOutcome, SyncError> {
    let partition = Partition::for_kind(T::KIND, user_id, year);
    let key = (T::KIND, partition.clone());

    enum Role {
      Leader(watch::Sender<Option<SharedOutcome>>),
      Follower(watch::Receiver<Option<SharedOutcome>>),
    }

    loop {
      // Check-and-insert under one lock so two callers can't both lead.
      let role = {
        let mut in_flight = self.lock_in_flight();
        match in_flight.get(&key) {
          Some(rx) => Role::Follower(rx.clone()),
          None => {
            let (tx, rx) = watch::channel(None);
            in_flight.insert(key.clone(), rx);
            Role::Leader(tx)
          }
        }
      };

      match role {
        Role::Follower(mut rx) => {
          // A closed channel means the leader was dropped before it could
          // publish; the guard has cleared the slot, so contend for it.
          let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => continue,
          };
          if let Some(result) = outcome {
            return result;
          }
        }
        Role::Leader(tx) => {
          // The guard clears the registry entry even if this future is
          // dropped mid-sync; the transaction either committed or never ran.
          let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
          };
          let result = self.sync_inner::<T>(&partition, user_id, year).await;
          let _ = tx.send(Some(result.clone()));
          return result;
        }
      }
    }
  }

  /// Sync one collection chosen at runtime.
  pub async fn sync_kind(
    &self,
    kind: EntityKind,
    user_id: i64,
    year: &str,
  ) -> Result<SyncOutcome, SyncError> {
    match kind {
      EntityKind::Users => self.sync::<User>(user_id, year).await,
      EntityKind::Accounts => self.sync::<Account>(user_id, year).await,
      EntityKind::ClosingBalances => self.sync::<ClosingBalance>(user_id, year).await,
      EntityKind::Templates => self.sync::<Template>(user_id, year).await,
      EntityKind::Stock => self.sync::<StockItem>(user_id, year).await,
      EntityKind::SalePurchase => self.sync::<SalePurchase>(user_id, year).await,
      EntityKind::Ledger => self.sync::<LedgerEntry>(user_id, year).await,
      EntityKind::Expiry => self.sync::<ExpiryItem>(user_id, year).await,
      EntityKind::PriceData => self.sync::<PriceEntry>(user_id, year).await,
      EntityKind::Outstanding => self.sync::<OutstandingBill>(user_id, year).await,
    }
  }

  async fn sync_inner<T: SyncEntity>(
    &self,
    partition: &Partition,
    user_id: i64,
    year: &str,
  ) -> Result<SyncOutcome, SyncError> {
    let year_arg = if T::KIND.is_partitioned() {
      Some(year)
    } else {
      None
    };

    match self.remote.fetch::<T>(user_id, year_arg).await {
      Ok(rows) => {
        self.persist(partition, &rows)?;
        info!(kind = %T::KIND, rows = rows.len(), %partition, "synced from remote");
        Ok(SyncOutcome::fresh(T::KIND, rows.len()))
      }
      Err(cause) if self.fallback_allowed(&cause) => {
        warn!(kind = %T::KIND, %cause, "fetch failed, serving bundled fallback");
        let rows = fallback::rows::<T>()?;
        self.persist(partition, &rows)?;
        Ok(SyncOutcome::fallback(T::KIND, rows.len(), &cause))
      }
      Err(cause) => Err(cause),
    }
  }

  pub(super) async fn remote_fetch_bundle(
    &self,
    user_id: i64,
    year: &str,
  ) -> Result<SyncBundle, SyncError> {
    self.remote.fetch_bundle(user_id, year).await
  }

  #[cfg(test)]
  pub(super) fn remote(&self) -> &R {
    &self.remote
  }

  /// Whether this failure may be masked by the bundled dataset.
  pub(super) fn fallback_allowed(&self, cause: &SyncError) -> bool {
    cause.is_recoverable() && self.policy == FallbackPolicy::Bundled
  }

  pub(super) fn persist_fresh<T: SyncEntity>(
    &self,
    user_id: i64,
    year: &str,
    rows: &[T],
  ) -> Result<SyncOutcome, SyncError> {
    let partition = Partition::for_kind(T::KIND, user_id, year);
    self.persist(&partition, rows)?;
    Ok(SyncOutcome::fresh(T::KIND, rows.len()))
  }

  pub(super) fn persist_fallback<T: SyncEntity>(
    &self,
    user_id: i64,
    year: &str,
    cause: &SyncError,
  ) -> Result<SyncOutcome, SyncError> {
    let partition = Partition::for_kind(T::KIND, user_id, year);
    let rows = fallback::rows::<T>()?;
    self.persist(&partition, &rows)?;
    Ok(SyncOutcome::fallback(T::KIND, rows.len(), cause))
  }

  fn persist<T: SyncEntity>(&self, partition: &Partition, rows: &[T]) -> Result<(), SyncError> {
    if T::KIND.is_partitioned() {
      self.store.replace_partition(partition, rows)?;
    } else {
      self.store.upsert_many(partition, rows)?;
    }
    Ok(())
  }

  fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, InFlightMap> {
    self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

struct InFlightGuard<'a> {
  in_flight: &'a Mutex<InFlightMap>,
  key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    let mut in_flight = self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    in_flight.remove(&self.key);
  }
}
