//! Aggregate sync across every collection.

use futures::future::join_all;
use tracing::{info, warn};

use super::syncer::{SyncEngine, SyncOutcome};
use crate::entity::{
  Account, ClosingBalance, EntityKind, ExpiryItem, LedgerEntry, OutstandingBill, PriceEntry,
  SalePurchase, StockItem, Template, User,
};
use crate::error::SyncError;
use crate::remote::RemoteFetcher;

/// Combined outcome of an aggregate sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub outcomes: Vec<SyncOutcome>,
  /// Kinds whose sync failed outright (storage failures, or any failure
  /// under the error policy), with the rendered cause.
  pub failed: Vec<(EntityKind, String)>,
}

impl SyncReport {
  pub fn total_rows(&self) -> usize {
    self.outcomes.iter().map(|o| o.rows).sum()
  }

  /// Kinds that were served from the bundled dataset.
  pub fn fallback_kinds(&self) -> Vec<EntityKind> {
    self
      .outcomes
      .iter()
      .filter(|o| o.used_fallback)
      .map(|o| o.kind)
      .collect()
  }

  /// Surface failures as a coordination error, keeping the report on success.
  pub fn into_result(self) -> Result<SyncReport, SyncError> {
    if self.failed.is_empty() {
      Ok(self)
    } else {
      Err(SyncError::Coordination {
        failed: self
          .failed
          .iter()
          .map(|(kind, cause)| format!("{} ({})", kind, cause))
          .collect(),
      })
    }
  }
}

impl<R: RemoteFetcher> SyncEngine<R> {
  /// Sync every collection concurrently, best-effort.
  ///
  /// Each kind still applies the per-kind fallback policy, so with the
  /// bundled policy the report only carries failures when storage breaks.
  pub async fn sync_all(&self, user_id: i64, year: &str) -> SyncReport {
    let syncs = EntityKind::ALL
      .map(|kind| async move { (kind, self.sync_kind(kind, user_id, year).await) });
    let results = join_all(syncs).await;

    let mut report = SyncReport::default();
    for (kind, result) in results {
      match result {
        Ok(outcome) => report.outcomes.push(outcome),
        Err(cause) => report.failed.push((kind, cause.to_string())),
      }
    }

    info!(
      rows = report.total_rows(),
      fallbacks = report.fallback_kinds().len(),
      failed = report.failed.len(),
      "aggregate sync finished"
    );
    report
  }

  /// Sync every collection from one composite API call, persisting
  /// sequentially and failing fast on the first storage error.
  pub async fn sync_from_bundle(&self, user_id: i64, year: &str) -> Result<SyncReport, SyncError> {
    match self.remote_fetch_bundle(user_id, year).await {
      Ok(bundle) => {
        let mut report = SyncReport::default();
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.users)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.accounts)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.closing_balances)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.templates)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.stock)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.sale_purchase)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.ledger)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.expiry)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.price_data)?);
        report.outcomes.push(self.persist_fresh(user_id, year, &bundle.outstanding)?);
        info!(rows = report.total_rows(), "composite sync finished");
        Ok(report)
      }
      Err(cause) if self.fallback_allowed(&cause) => {
        warn!(%cause, "composite sync failed, serving bundled fallback for every collection");
        let mut report = SyncReport::default();
        for kind in EntityKind::ALL {
          report.outcomes.push(self.fallback_kind(kind, user_id, year, &cause)?);
        }
        Ok(report)
      }
      Err(cause) => Err(cause),
    }
  }

  fn fallback_kind(
    &self,
    kind: EntityKind,
    user_id: i64,
    year: &str,
    cause: &SyncError,
  ) -> Result<SyncOutcome, SyncError> {
    match kind {
      EntityKind::Users => self.persist_fallback::<User>(user_id, year, cause),
      EntityKind::Accounts => self.persist_fallback::<Account>(user_id, year, cause),
      EntityKind::ClosingBalances => self.persist_fallback::<ClosingBalance>(user_id, year, cause),
      EntityKind::Templates => self.persist_fallback::<Template>(user_id, year, cause),
      EntityKind::Stock => self.persist_fallback::<StockItem>(user_id, year, cause),
      EntityKind::SalePurchase => self.persist_fallback::<SalePurchase>(user_id, year, cause),
      EntityKind::Ledger => self.persist_fallback::<LedgerEntry>(user_id, year, cause),
      EntityKind::Expiry => self.persist_fallback::<ExpiryItem>(user_id, year, cause),
      EntityKind::PriceData => self.persist_fallback::<PriceEntry>(user_id, year, cause),
      EntityKind::Outstanding => self.persist_fallback::<OutstandingBill>(user_id, year, cause),
    }
  }
}
