//! Entity schema: the syncable collections, their row shapes and keys.
//!
//! Every collection the app syncs is described by an [`EntityKind`]. Global
//! kinds hold one copy per installation; partitioned kinds hold one copy per
//! `(user_id, year)` and are only ever bulk-replaced one partition at a time.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the ten syncable collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Users,
  Accounts,
  ClosingBalances,
  Templates,
  Stock,
  SalePurchase,
  Ledger,
  Expiry,
  PriceData,
  Outstanding,
}

impl EntityKind {
  /// Every kind, in the order the aggregate sync runs them.
  pub const ALL: [EntityKind; 10] = [
    EntityKind::Users,
    EntityKind::Accounts,
    EntityKind::ClosingBalances,
    EntityKind::Templates,
    EntityKind::Stock,
    EntityKind::SalePurchase,
    EntityKind::Ledger,
    EntityKind::Expiry,
    EntityKind::PriceData,
    EntityKind::Outstanding,
  ];

  /// Stable name, used as storage discriminator and API path segment.
  pub fn name(&self) -> &'static str {
    match self {
      EntityKind::Users => "users",
      EntityKind::Accounts => "accounts",
      EntityKind::ClosingBalances => "closing_balances",
      EntityKind::Templates => "templates",
      EntityKind::Stock => "stock",
      EntityKind::SalePurchase => "sale_purchase",
      EntityKind::Ledger => "ledger",
      EntityKind::Expiry => "expiry",
      EntityKind::PriceData => "price_data",
      EntityKind::Outstanding => "outstanding",
    }
  }

  /// Whether rows are scoped by `(user_id, year)`.
  pub fn is_partitioned(&self) -> bool {
    matches!(
      self,
      EntityKind::Stock
        | EntityKind::SalePurchase
        | EntityKind::Ledger
        | EntityKind::Expiry
        | EntityKind::PriceData
        | EntityKind::Outstanding
    )
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_lowercase().replace('-', "_");
    EntityKind::ALL
      .iter()
      .find(|k| k.name() == normalized)
      .copied()
      .ok_or_else(|| format!("unknown collection '{}'", s))
  }
}

/// The scope a row set belongs to.
///
/// Global kinds always live in the root partition; partitioned kinds live
/// under one `(user_id, year)` each. Construct via [`Partition::for_kind`]
/// so a kind can never end up in the wrong scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Partition {
  Global,
  Year { user_id: i64, year: String },
}

impl Partition {
  /// The partition a sync of `kind` writes into.
  pub fn for_kind(kind: EntityKind, user_id: i64, year: &str) -> Partition {
    if kind.is_partitioned() {
      Partition::Year {
        user_id,
        year: year.to_string(),
      }
    } else {
      Partition::Global
    }
  }

  pub fn user_id(&self) -> i64 {
    match self {
      Partition::Global => 0,
      Partition::Year { user_id, .. } => *user_id,
    }
  }

  pub fn year(&self) -> &str {
    match self {
      Partition::Global => "",
      Partition::Year { year, .. } => year,
    }
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Partition::Global => f.write_str("global"),
      Partition::Year { user_id, year } => write!(f, "user {} / {}", user_id, year),
    }
  }
}

/// A row type that can be synced and cached.
///
/// Implementors bind themselves to one [`EntityKind`] and provide the key
/// the cache upserts by. Keys are unique within a kind and partition.
pub trait SyncEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Which collection this row belongs to.
  const KIND: EntityKind;

  /// Unique key within the collection (and partition, if any).
  fn cache_key(&self) -> String;
}

// ============================================================================
// Global kinds
// ============================================================================

/// An app user (the people reports are generated for).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub name: String,
  pub mobile: String,
  pub email: Option<String>,
}

impl SyncEntity for User {
  const KIND: EntityKind = EntityKind::Users;

  fn cache_key(&self) -> String {
    self.id.to_string()
  }
}

/// A party account (customer or supplier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
  pub code: String,
  pub name: String,
  pub city: Option<String>,
  pub route: Option<String>,
}

impl SyncEntity for Account {
  const KIND: EntityKind = EntityKind::Accounts;

  fn cache_key(&self) -> String {
    self.code.clone()
  }
}

/// Closing balance for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingBalance {
  pub account_code: String,
  pub balance: f64,
  /// "Dr" or "Cr"
  pub drcr: String,
}

impl SyncEntity for ClosingBalance {
  const KIND: EntityKind = EntityKind::ClosingBalances;

  fn cache_key(&self) -> String {
    self.account_code.clone()
  }
}

/// A message template (used by the share screens, cached like any other kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
  pub id: i64,
  pub name: String,
  pub body: String,
}

impl SyncEntity for Template {
  const KIND: EntityKind = EntityKind::Templates;

  fn cache_key(&self) -> String {
    self.id.to_string()
  }
}

// ============================================================================
// Partitioned kinds (scoped by user and financial year)
// ============================================================================

/// Current stock of one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
  pub item_code: String,
  pub name: String,
  pub packing: Option<String>,
  pub quantity: f64,
  pub value: f64,
}

impl SyncEntity for StockItem {
  const KIND: EntityKind = EntityKind::Stock;

  fn cache_key(&self) -> String {
    self.item_code.clone()
  }
}

/// Monthly sale/purchase totals for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalePurchase {
  pub account_code: String,
  /// Month within the financial year, "YYYY-MM".
  pub month: String,
  pub sale: f64,
  pub purchase: f64,
}

impl SyncEntity for SalePurchase {
  const KIND: EntityKind = EntityKind::SalePurchase;

  fn cache_key(&self) -> String {
    format!("{}:{}", self.account_code, self.month)
  }
}

/// One ledger entry for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
  pub entry_id: i64,
  pub account_code: String,
  pub date: NaiveDate,
  pub narration: String,
  pub debit: f64,
  pub credit: f64,
}

impl SyncEntity for LedgerEntry {
  const KIND: EntityKind = EntityKind::Ledger;

  fn cache_key(&self) -> String {
    self.entry_id.to_string()
  }
}

/// A stock batch approaching its expiry date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryItem {
  pub item_code: String,
  pub batch: String,
  pub expiry_date: NaiveDate,
  pub quantity: f64,
}

impl SyncEntity for ExpiryItem {
  const KIND: EntityKind = EntityKind::Expiry;

  fn cache_key(&self) -> String {
    format!("{}:{}", self.item_code, self.batch)
  }
}

/// Price list entry for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
  pub item_code: String,
  pub name: String,
  pub rate: f64,
  pub mrp: f64,
}

impl SyncEntity for PriceEntry {
  const KIND: EntityKind = EntityKind::PriceData;

  fn cache_key(&self) -> String {
    self.item_code.clone()
  }
}

/// An unpaid bill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingBill {
  pub account_code: String,
  pub bill_no: String,
  pub bill_date: NaiveDate,
  pub days: i64,
  pub amount: f64,
}

impl SyncEntity for OutstandingBill {
  const KIND: EntityKind = EntityKind::Outstanding;

  fn cache_key(&self) -> String {
    self.bill_no.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_name_roundtrip() {
    for kind in EntityKind::ALL {
      assert_eq!(kind.name().parse::<EntityKind>(), Ok(kind));
    }
  }

  #[test]
  fn test_kind_parse_accepts_hyphens_and_case() {
    assert_eq!("Closing-Balances".parse::<EntityKind>(), Ok(EntityKind::ClosingBalances));
    assert_eq!(" LEDGER ".parse::<EntityKind>(), Ok(EntityKind::Ledger));
    assert!("invoices".parse::<EntityKind>().is_err());
  }

  #[test]
  fn test_partition_for_kind() {
    assert_eq!(
      Partition::for_kind(EntityKind::Accounts, 7, "2024-2025"),
      Partition::Global
    );
    assert_eq!(
      Partition::for_kind(EntityKind::Stock, 7, "2024-2025"),
      Partition::Year {
        user_id: 7,
        year: "2024-2025".to_string()
      }
    );
  }

  #[test]
  fn test_four_global_six_partitioned() {
    let partitioned = EntityKind::ALL.iter().filter(|k| k.is_partitioned()).count();
    assert_eq!(partitioned, 6);
    assert_eq!(EntityKind::ALL.len() - partitioned, 4);
  }
}
