//! Reactive read façade over the cache.
//!
//! Everything here is a pure projection of whatever the cache currently
//! holds: reads never mutate it and never trigger a sync. Syncs are always
//! started explicitly by a caller.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::CacheStore;
use crate::entity::{
  Account, ClosingBalance, EntityKind, OutstandingBill, Partition, SyncEntity,
};
use crate::error::StorageError;

/// Live query over one collection.
///
/// The first `next()` resolves immediately with the current snapshot;
/// subsequent calls resolve once per write batch touching the same
/// `(kind, partition)`, coalesced to the freshest state. Drop to cancel.
pub struct LiveQuery<T: SyncEntity> {
  store: Arc<CacheStore>,
  partition: Partition,
  rx: watch::Receiver<u64>,
  primed: bool,
  _row: PhantomData<T>,
}

impl<T: SyncEntity> LiveQuery<T> {
  fn new(store: Arc<CacheStore>, partition: Partition) -> Self {
    let rx = store.subscribe(T::KIND, &partition);
    Self {
      store,
      partition,
      rx,
      primed: false,
      _row: PhantomData,
    }
  }

  /// Wait for the next snapshot.
  pub async fn next(&mut self) -> Result<Vec<T>, StorageError> {
    if self.primed {
      self
        .rx
        .changed()
        .await
        .map_err(|_| StorageError("cache store closed".to_string()))?;
    }
    self.primed = true;
    // Mark the current version seen before reading, so the read is at
    // least as fresh as anything we were woken for.
    self.rx.borrow_and_update();
    self.store.read_all(&self.partition)
  }
}

/// One row of the account balance report.
#[derive(Debug, Clone)]
pub struct AccountBalanceRow {
  pub code: String,
  pub name: String,
  pub city: Option<String>,
  pub balance: f64,
  pub drcr: String,
}

/// Outstanding bills rolled up per account.
#[derive(Debug, Clone)]
pub struct OutstandingSummaryRow {
  pub account_code: String,
  pub bills: usize,
  pub total: f64,
  pub oldest_days: i64,
}

/// Read façade handed to presentation code.
#[derive(Clone)]
pub struct Reports {
  store: Arc<CacheStore>,
}

impl Reports {
  pub fn new(store: Arc<CacheStore>) -> Self {
    Self { store }
  }

  /// Live stream of one collection's rows.
  pub fn live<T: SyncEntity>(&self, partition: Partition) -> LiveQuery<T> {
    LiveQuery::new(Arc::clone(&self.store), partition)
  }

  /// Accounts joined with their closing balances, ordered by account code.
  /// Accounts without a balance row show zero.
  pub fn account_balances(&self) -> Result<Vec<AccountBalanceRow>, StorageError> {
    let accounts: Vec<Account> = self.store.read_all(&Partition::Global)?;
    let balances: Vec<ClosingBalance> = self.store.read_all(&Partition::Global)?;
    let by_code: HashMap<String, ClosingBalance> = balances
      .into_iter()
      .map(|b| (b.account_code.clone(), b))
      .collect();

    Ok(
      accounts
        .into_iter()
        .map(|account| {
          let balance = by_code.get(&account.code);
          AccountBalanceRow {
            code: account.code,
            name: account.name,
            city: account.city,
            balance: balance.map(|b| b.balance).unwrap_or(0.0),
            drcr: balance.map(|b| b.drcr.clone()).unwrap_or_default(),
          }
        })
        .collect(),
    )
  }

  /// Live variant of [`Reports::account_balances`]: wakes on writes to
  /// either underlying collection.
  pub fn live_account_balances(&self) -> LiveBalances {
    LiveBalances {
      accounts_rx: self.store.subscribe(EntityKind::Accounts, &Partition::Global),
      balances_rx: self
        .store
        .subscribe(EntityKind::ClosingBalances, &Partition::Global),
      reports: self.clone(),
      primed: false,
    }
  }

  /// Outstanding bills for one `(user_id, year)` rolled up per account,
  /// ordered by account code.
  pub fn outstanding_summary(
    &self,
    user_id: i64,
    year: &str,
  ) -> Result<Vec<OutstandingSummaryRow>, StorageError> {
    let partition = Partition::for_kind(EntityKind::Outstanding, user_id, year);
    let bills: Vec<OutstandingBill> = self.store.read_all(&partition)?;

    let mut by_account: HashMap<String, OutstandingSummaryRow> = HashMap::new();
    for bill in bills {
      let entry = by_account
        .entry(bill.account_code.clone())
        .or_insert_with(|| OutstandingSummaryRow {
          account_code: bill.account_code.clone(),
          bills: 0,
          total: 0.0,
          oldest_days: 0,
        });
      entry.bills += 1;
      entry.total += bill.amount;
      entry.oldest_days = entry.oldest_days.max(bill.days);
    }

    let mut rows: Vec<OutstandingSummaryRow> = by_account.into_values().collect();
    rows.sort_by(|a, b| a.account_code.cmp(&b.account_code));
    Ok(rows)
  }
}

/// Live account balance report.
pub struct LiveBalances {
  reports: Reports,
  accounts_rx: watch::Receiver<u64>,
  balances_rx: watch::Receiver<u64>,
  primed: bool,
}

impl LiveBalances {
  /// Wait for the next report snapshot; immediate on first call.
  pub async fn next(&mut self) -> Result<Vec<AccountBalanceRow>, StorageError> {
    if self.primed {
      let changed = tokio::select! {
        changed = self.accounts_rx.changed() => changed,
        changed = self.balances_rx.changed() => changed,
      };
      changed.map_err(|_| StorageError("cache store closed".to_string()))?;
    }
    self.primed = true;
    self.accounts_rx.borrow_and_update();
    self.balances_rx.borrow_and_update();
    self.reports.account_balances()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn account(code: &str, name: &str) -> Account {
    Account {
      code: code.to_string(),
      name: name.to_string(),
      city: None,
      route: None,
    }
  }

  fn balance(code: &str, amount: f64, drcr: &str) -> ClosingBalance {
    ClosingBalance {
      account_code: code.to_string(),
      balance: amount,
      drcr: drcr.to_string(),
    }
  }

  fn setup() -> (Arc<CacheStore>, Reports) {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let reports = Reports::new(Arc::clone(&store));
    (store, reports)
  }

  #[tokio::test]
  async fn test_live_query_initial_snapshot_then_updates() {
    let (store, reports) = setup();
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha")])
      .unwrap();

    let mut live = reports.live::<Account>(Partition::Global);
    assert_eq!(live.next().await.unwrap().len(), 1);

    store
      .upsert_many(&Partition::Global, &[account("A2", "Beta")])
      .unwrap();
    assert_eq!(live.next().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_resubscribing_reissues_current_snapshot() {
    let (store, reports) = setup();
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha"), account("A2", "Beta")])
      .unwrap();

    // A brand new subscription sees the current rows immediately
    let mut live = reports.live::<Account>(Partition::Global);
    assert_eq!(live.next().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_live_query_coalesces_write_bursts() {
    let (store, reports) = setup();
    let mut live = reports.live::<Account>(Partition::Global);
    assert!(live.next().await.unwrap().is_empty());

    for i in 0..5 {
      store
        .upsert_many(&Partition::Global, &[account(&format!("A{}", i), "Acc")])
        .unwrap();
    }

    // One wakeup delivers the freshest state, not five intermediate ones
    assert_eq!(live.next().await.unwrap().len(), 5);
  }

  #[test]
  fn test_account_balances_join() {
    let (store, reports) = setup();
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha"), account("A2", "Beta")])
      .unwrap();
    store
      .upsert_many(&Partition::Global, &[balance("A1", 1500.0, "Dr")])
      .unwrap();

    let rows = reports.account_balances().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].code, "A1");
    assert_eq!(rows[0].balance, 1500.0);
    assert_eq!(rows[0].drcr, "Dr");
    assert_eq!(rows[1].balance, 0.0);
    assert!(rows[1].drcr.is_empty());
  }

  #[tokio::test]
  async fn test_live_balances_wakes_on_either_collection() {
    let (store, reports) = setup();
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha")])
      .unwrap();

    let mut live = reports.live_account_balances();
    let initial = live.next().await.unwrap();
    assert_eq!(initial[0].balance, 0.0);

    store
      .upsert_many(&Partition::Global, &[balance("A1", 900.0, "Cr")])
      .unwrap();
    let updated = live.next().await.unwrap();
    assert_eq!(updated[0].balance, 900.0);
  }

  #[test]
  fn test_outstanding_summary_groups_per_account() {
    let (store, reports) = setup();
    let partition = Partition::for_kind(EntityKind::Outstanding, 1, "2024-2025");
    let bills = vec![
      OutstandingBill {
        account_code: "A1".to_string(),
        bill_no: "B1".to_string(),
        bill_date: chrono::NaiveDate::from_ymd_opt(2025, 4, 5).unwrap(),
        days: 45,
        amount: 1200.0,
      },
      OutstandingBill {
        account_code: "A1".to_string(),
        bill_no: "B2".to_string(),
        bill_date: chrono::NaiveDate::from_ymd_opt(2025, 4, 20).unwrap(),
        days: 30,
        amount: 800.0,
      },
      OutstandingBill {
        account_code: "A2".to_string(),
        bill_no: "B3".to_string(),
        bill_date: chrono::NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        days: 10,
        amount: 500.0,
      },
    ];
    store.replace_partition(&partition, &bills).unwrap();

    let rows = reports.outstanding_summary(1, "2024-2025").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].account_code, "A1");
    assert_eq!(rows[0].bills, 2);
    assert_eq!(rows[0].total, 2000.0);
    assert_eq!(rows[0].oldest_days, 45);
  }
}
