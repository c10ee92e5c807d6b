//! Bundled fallback datasets.
//!
//! When a fetch fails and the fallback policy allows it, the orchestrator
//! persists these rows instead so report screens always have something to
//! render. The datasets ship with the app and version with it.

use crate::entity::{EntityKind, SyncEntity};
use crate::error::SyncError;

/// The bundled dataset for one collection.
pub fn rows<T: SyncEntity>() -> Result<Vec<T>, SyncError> {
  serde_json::from_str(raw(T::KIND)).map_err(|e| {
    SyncError::Validation(format!("bundled {} dataset is invalid: {}", T::KIND, e))
  })
}

fn raw(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Users => include_str!("../assets/fallback/users.json"),
    EntityKind::Accounts => include_str!("../assets/fallback/accounts.json"),
    EntityKind::ClosingBalances => include_str!("../assets/fallback/closing_balances.json"),
    EntityKind::Templates => include_str!("../assets/fallback/templates.json"),
    EntityKind::Stock => include_str!("../assets/fallback/stock.json"),
    EntityKind::SalePurchase => include_str!("../assets/fallback/sale_purchase.json"),
    EntityKind::Ledger => include_str!("../assets/fallback/ledger.json"),
    EntityKind::Expiry => include_str!("../assets/fallback/expiry.json"),
    EntityKind::PriceData => include_str!("../assets/fallback/price_data.json"),
    EntityKind::Outstanding => include_str!("../assets/fallback/outstanding.json"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::*;

  #[test]
  fn test_every_bundled_dataset_is_valid_json() {
    for kind in EntityKind::ALL {
      let parsed: Result<Vec<serde_json::Value>, _> = serde_json::from_str(raw(kind));
      assert!(parsed.is_ok(), "bundled {} dataset does not parse", kind);
      assert!(!parsed.unwrap().is_empty(), "bundled {} dataset is empty", kind);
    }
  }

  #[test]
  fn test_every_bundled_dataset_matches_its_row_shape() {
    assert!(!rows::<User>().unwrap().is_empty());
    assert!(!rows::<Account>().unwrap().is_empty());
    assert!(!rows::<ClosingBalance>().unwrap().is_empty());
    assert!(!rows::<Template>().unwrap().is_empty());
    assert!(!rows::<StockItem>().unwrap().is_empty());
    assert!(!rows::<SalePurchase>().unwrap().is_empty());
    assert!(!rows::<LedgerEntry>().unwrap().is_empty());
    assert!(!rows::<ExpiryItem>().unwrap().is_empty());
    assert!(!rows::<PriceEntry>().unwrap().is_empty());
    assert!(!rows::<OutstandingBill>().unwrap().is_empty());
  }
}
