//! SQLite-backed cache store.
//!
//! All ten collections share one table of serialized JSON rows, keyed by
//! `(kind, user_id, year, row_key)`. Global kinds use the root partition
//! `(0, '')`. The connection sits behind a mutex: writers hold it for the
//! whole transaction, so a reader observes either the pre-write or the
//! post-write row set, never a mix.

use rusqlite::{params, Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

use super::watch::ChangeHub;
use crate::entity::{EntityKind, Partition, SyncEntity};
use crate::error::StorageError;

/// Schema for the cache table.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_rows (
    kind TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    year TEXT NOT NULL,
    row_key TEXT NOT NULL,
    data BLOB NOT NULL,
    synced_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (kind, user_id, year, row_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_rows_partition
    ON cache_rows(kind, user_id, year);
"#;

/// Durable cache holding the current rows of every collection.
pub struct CacheStore {
  conn: Mutex<Connection>,
  hub: ChangeHub,
}

impl CacheStore {
  /// Open or create the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StorageError(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| StorageError(format!("failed to open cache at {}: {}", path.display(), e)))?;

    Self::from_conn(conn)
  }

  /// Open the cache at the default location.
  pub fn open_default() -> Result<Self, StorageError> {
    Self::open(&Self::default_path()?)
  }

  /// Default database path.
  fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError("could not determine data directory".to_string()))?;

    Ok(data_dir.join("repsync").join("cache.db"))
  }

  /// In-memory store for tests.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory().map_err(StorageError::from)?;
    Self::from_conn(conn)
  }

  fn from_conn(conn: Connection) -> Result<Self, StorageError> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| StorageError(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
      hub: ChangeHub::default(),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|_| StorageError("connection lock poisoned".to_string()))
  }

  /// Insert or replace rows by key. Idempotent; empty input is a no-op.
  ///
  /// The whole batch commits in one transaction, so a mid-batch failure
  /// leaves no visible partial update.
  pub fn upsert_many<T: SyncEntity>(
    &self,
    partition: &Partition,
    rows: &[T],
  ) -> Result<(), StorageError> {
    if rows.is_empty() {
      return Ok(());
    }

    {
      let mut conn = self.lock()?;
      let tx = conn.transaction().map_err(StorageError::from)?;
      insert_rows(&tx, T::KIND, partition, rows)?;
      tx.commit().map_err(StorageError::from)?;
    }

    debug!(kind = %T::KIND, rows = rows.len(), %partition, "upserted rows");
    self.hub.notify(T::KIND, partition);
    Ok(())
  }

  /// Atomically clear one partition and insert the given rows.
  ///
  /// Clear-then-insert runs under a single transaction; an empty row list
  /// leaves the partition empty and still succeeds.
  pub fn replace_partition<T: SyncEntity>(
    &self,
    partition: &Partition,
    rows: &[T],
  ) -> Result<(), StorageError> {
    {
      let mut conn = self.lock()?;
      let tx = conn.transaction().map_err(StorageError::from)?;
      tx.execute(
        "DELETE FROM cache_rows WHERE kind = ?1 AND user_id = ?2 AND year = ?3",
        params![T::KIND.name(), partition.user_id(), partition.year()],
      )
      .map_err(StorageError::from)?;
      insert_rows(&tx, T::KIND, partition, rows)?;
      tx.commit().map_err(StorageError::from)?;
    }

    debug!(kind = %T::KIND, rows = rows.len(), %partition, "replaced partition");
    self.hub.notify(T::KIND, partition);
    Ok(())
  }

  /// Delete all rows in one partition. No-op if none exist.
  ///
  /// For a partitioned kind, the global partition means "all partitions".
  pub fn clear_partition(
    &self,
    kind: EntityKind,
    partition: &Partition,
  ) -> Result<(), StorageError> {
    {
      let conn = self.lock()?;
      if spans_all_partitions(kind, partition) {
        conn
          .execute("DELETE FROM cache_rows WHERE kind = ?1", params![kind.name()])
          .map_err(StorageError::from)?;
      } else {
        conn
          .execute(
            "DELETE FROM cache_rows WHERE kind = ?1 AND user_id = ?2 AND year = ?3",
            params![kind.name(), partition.user_id(), partition.year()],
          )
          .map_err(StorageError::from)?;
      }
    }

    self.hub.notify(kind, partition);
    Ok(())
  }

  /// Read the current rows of a collection.
  ///
  /// For a partitioned kind, the global partition means "all partitions".
  pub fn read_all<T: SyncEntity>(&self, partition: &Partition) -> Result<Vec<T>, StorageError> {
    self
      .read_blobs(T::KIND, partition)?
      .iter()
      .map(|data| serde_json::from_slice(data).map_err(StorageError::from))
      .collect()
  }

  /// Read rows as raw JSON values, for kind-agnostic display.
  pub fn read_raw(
    &self,
    kind: EntityKind,
    partition: &Partition,
  ) -> Result<Vec<serde_json::Value>, StorageError> {
    self
      .read_blobs(kind, partition)?
      .iter()
      .map(|data| serde_json::from_slice(data).map_err(StorageError::from))
      .collect()
  }

  fn read_blobs(
    &self,
    kind: EntityKind,
    partition: &Partition,
  ) -> Result<Vec<Vec<u8>>, StorageError> {
    let conn = self.lock()?;

    let blobs = if spans_all_partitions(kind, partition) {
      let mut stmt = conn
        .prepare("SELECT data FROM cache_rows WHERE kind = ?1 ORDER BY user_id, year, row_key")
        .map_err(StorageError::from)?;
      let rows = stmt
        .query_map(params![kind.name()], |row| row.get::<_, Vec<u8>>(0))
        .map_err(StorageError::from)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::from)?;
      rows
    } else {
      let mut stmt = conn
        .prepare(
          "SELECT data FROM cache_rows WHERE kind = ?1 AND user_id = ?2 AND year = ?3
           ORDER BY row_key",
        )
        .map_err(StorageError::from)?;
      let rows = stmt
        .query_map(
          params![kind.name(), partition.user_id(), partition.year()],
          |row| row.get::<_, Vec<u8>>(0),
        )
        .map_err(StorageError::from)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::from)?;
      rows
    };

    Ok(blobs)
  }

  /// Count rows in one partition.
  ///
  /// For a partitioned kind, the global partition means "all partitions".
  pub fn count(&self, kind: EntityKind, partition: &Partition) -> Result<i64, StorageError> {
    let conn = self.lock()?;
    if spans_all_partitions(kind, partition) {
      conn
        .query_row(
          "SELECT COUNT(*) FROM cache_rows WHERE kind = ?1",
          params![kind.name()],
          |row| row.get(0),
        )
        .map_err(StorageError::from)
    } else {
      conn
        .query_row(
          "SELECT COUNT(*) FROM cache_rows WHERE kind = ?1 AND user_id = ?2 AND year = ?3",
          params![kind.name(), partition.user_id(), partition.year()],
          |row| row.get(0),
        )
        .map_err(StorageError::from)
    }
  }

  /// Drop the backing table so the next write fails, for failure-path tests.
  #[cfg(test)]
  pub fn break_schema(&self) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn
      .execute_batch("DROP TABLE cache_rows")
      .map_err(StorageError::from)
  }

  /// Subscribe to writes touching `(kind, partition)`.
  ///
  /// The receiver carries a version counter; each committed write bumps it.
  /// Bursts coalesce to the latest version. Drop the receiver to cancel.
  pub fn subscribe(&self, kind: EntityKind, partition: &Partition) -> watch::Receiver<u64> {
    self.hub.subscribe(kind, partition)
  }
}

// For a partitioned kind the global partition means "all partitions"
fn spans_all_partitions(kind: EntityKind, partition: &Partition) -> bool {
  kind.is_partitioned() && matches!(partition, Partition::Global)
}

fn insert_rows<T: SyncEntity>(
  tx: &Transaction<'_>,
  kind: EntityKind,
  partition: &Partition,
  rows: &[T],
) -> Result<(), StorageError> {
  let mut stmt = tx
    .prepare(
      "INSERT OR REPLACE INTO cache_rows (kind, user_id, year, row_key, data, synced_at)
       VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
    )
    .map_err(StorageError::from)?;

  for row in rows {
    let data = serde_json::to_vec(row).map_err(StorageError::from)?;
    stmt
      .execute(params![
        kind.name(),
        partition.user_id(),
        partition.year(),
        row.cache_key(),
        data
      ])
      .map_err(StorageError::from)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::{Account, StockItem};
  use std::sync::Arc;

  fn account(code: &str, name: &str) -> Account {
    Account {
      code: code.to_string(),
      name: name.to_string(),
      city: None,
      route: None,
    }
  }

  fn stock(item_code: &str, quantity: f64) -> StockItem {
    StockItem {
      item_code: item_code.to_string(),
      name: format!("Item {}", item_code),
      packing: None,
      quantity,
      value: quantity * 10.0,
    }
  }

  fn year(user_id: i64, year: &str) -> Partition {
    Partition::Year {
      user_id,
      year: year.to_string(),
    }
  }

  #[test]
  fn test_upsert_replaces_by_key() {
    let store = CacheStore::open_in_memory().unwrap();
    let rows = vec![account("A1", "Alpha"), account("A2", "Beta")];
    store.upsert_many(&Partition::Global, &rows).unwrap();

    // Same key, new payload: must replace, not duplicate
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha Traders")])
      .unwrap();

    let read: Vec<Account> = store.read_all(&Partition::Global).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].code, "A1");
    assert_eq!(read[0].name, "Alpha Traders");
  }

  #[test]
  fn test_upsert_idempotent_and_empty_ok() {
    let store = CacheStore::open_in_memory().unwrap();
    let rows = vec![account("A1", "Alpha")];

    store.upsert_many(&Partition::Global, &rows).unwrap();
    store.upsert_many(&Partition::Global, &rows).unwrap();
    store
      .upsert_many::<Account>(&Partition::Global, &[])
      .unwrap();

    assert_eq!(store.count(EntityKind::Accounts, &Partition::Global).unwrap(), 1);
  }

  #[test]
  fn test_replace_partition_isolation() {
    let store = CacheStore::open_in_memory().unwrap();
    let fy24 = year(1, "2024-2025");
    let fy25 = year(1, "2025-2026");

    store
      .replace_partition(&fy24, &[stock("S1", 5.0), stock("S2", 2.0)])
      .unwrap();
    store.replace_partition(&fy25, &[stock("S9", 1.0)]).unwrap();

    // Replacing one year must not touch the other
    store.replace_partition(&fy24, &[stock("S3", 8.0)]).unwrap();

    let fy24_rows: Vec<StockItem> = store.read_all(&fy24).unwrap();
    let fy25_rows: Vec<StockItem> = store.read_all(&fy25).unwrap();
    assert_eq!(fy24_rows.len(), 1);
    assert_eq!(fy24_rows[0].item_code, "S3");
    assert_eq!(fy25_rows.len(), 1);
    assert_eq!(fy25_rows[0].item_code, "S9");
  }

  #[test]
  fn test_replace_with_empty_clears_partition() {
    let store = CacheStore::open_in_memory().unwrap();
    let fy24 = year(1, "2024-2025");

    store
      .replace_partition(&fy24, &[stock("S1", 5.0), stock("S2", 2.0)])
      .unwrap();
    store.replace_partition::<StockItem>(&fy24, &[]).unwrap();

    assert_eq!(store.count(EntityKind::Stock, &fy24).unwrap(), 0);
  }

  #[test]
  fn test_clear_partition_noop_when_empty() {
    let store = CacheStore::open_in_memory().unwrap();
    store
      .clear_partition(EntityKind::Stock, &year(1, "2024-2025"))
      .unwrap();
  }

  #[test]
  fn test_global_read_spans_partitions() {
    let store = CacheStore::open_in_memory().unwrap();
    store.replace_partition(&year(1, "2024-2025"), &[stock("S1", 5.0)]).unwrap();
    store.replace_partition(&year(2, "2024-2025"), &[stock("S2", 3.0)]).unwrap();

    let all: Vec<StockItem> = store.read_all(&Partition::Global).unwrap();
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn test_global_count_and_clear_span_partitions() {
    let store = CacheStore::open_in_memory().unwrap();
    store.replace_partition(&year(1, "2024-2025"), &[stock("S1", 5.0)]).unwrap();
    store.replace_partition(&year(2, "2025-2026"), &[stock("S2", 3.0)]).unwrap();

    // count agrees with what a global read returns
    assert_eq!(store.count(EntityKind::Stock, &Partition::Global).unwrap(), 2);

    store.clear_partition(EntityKind::Stock, &Partition::Global).unwrap();
    assert_eq!(store.count(EntityKind::Stock, &Partition::Global).unwrap(), 0);
    let all: Vec<StockItem> = store.read_all(&Partition::Global).unwrap();
    assert!(all.is_empty());
  }

  #[test]
  fn test_read_raw_round_trips_rows() {
    let store = CacheStore::open_in_memory().unwrap();
    store
      .upsert_many(&Partition::Global, &[account("A1", "Alpha")])
      .unwrap();

    let raw = store.read_raw(EntityKind::Accounts, &Partition::Global).unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0]["code"], "A1");
  }

  /// A reader racing a replace sees the old row set or the new one, never
  /// a partial mix.
  #[test]
  fn test_replace_is_atomic_under_concurrent_reads() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let fy24 = year(1, "2024-2025");

    let small: Vec<StockItem> = (0..3).map(|i| stock(&format!("A{}", i), 1.0)).collect();
    let large: Vec<StockItem> = (0..7).map(|i| stock(&format!("B{}", i), 1.0)).collect();
    store.replace_partition(&fy24, &small).unwrap();

    let writer = {
      let store = Arc::clone(&store);
      let fy24 = fy24.clone();
      let (small, large) = (small.clone(), large.clone());
      std::thread::spawn(move || {
        for i in 0..40 {
          let rows = if i % 2 == 0 { &large } else { &small };
          store.replace_partition(&fy24, rows).unwrap();
        }
      })
    };

    for _ in 0..200 {
      let count = store.count(EntityKind::Stock, &fy24).unwrap();
      assert!(count == 3 || count == 7, "observed partial row set: {}", count);
    }

    writer.join().unwrap();
  }

  #[tokio::test]
  async fn test_write_bumps_subscription() {
    let store = CacheStore::open_in_memory().unwrap();
    let fy24 = year(1, "2024-2025");
    let mut rx = store.subscribe(EntityKind::Stock, &fy24);
    rx.borrow_and_update();

    store.replace_partition(&fy24, &[stock("S1", 5.0)]).unwrap();

    rx.changed().await.expect("store keeps channels alive");
    assert_eq!(*rx.borrow(), 1);
  }
}
