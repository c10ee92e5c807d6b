//! Change notification for cache subscriptions.
//!
//! One `tokio::sync::watch` channel per `(kind, partition)` carries a
//! monotonically increasing version. Subscribers re-read the store when the
//! version moves; `watch` semantics coalesce bursts of writes into the
//! latest version, which is exactly the at-least-fresh guarantee readers
//! need. A kind-wide channel (the global key) is bumped on every write to
//! that kind so cross-partition subscriptions work too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::entity::{EntityKind, Partition};

type ChannelKey = (EntityKind, i64, String);

/// Registry of per-`(kind, partition)` version channels.
///
/// Cloning is cheap and shares the underlying registry. Senders are kept
/// alive for the life of the hub so a subscription never observes a closed
/// channel while the store exists.
#[derive(Clone, Default)]
pub struct ChangeHub {
  channels: Arc<Mutex<HashMap<ChannelKey, watch::Sender<u64>>>>,
}

impl ChangeHub {
  /// Subscribe to writes touching `(kind, partition)`.
  ///
  /// Subscribing to the global partition of a partitioned kind observes
  /// writes to every partition of that kind.
  pub fn subscribe(&self, kind: EntityKind, partition: &Partition) -> watch::Receiver<u64> {
    let mut channels = self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    channels
      .entry(key(kind, partition))
      .or_insert_with(|| watch::channel(0).0)
      .subscribe()
  }

  /// Record a committed write to `(kind, partition)`.
  pub fn notify(&self, kind: EntityKind, partition: &Partition) {
    let mut channels = self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    bump(&mut channels, key(kind, partition));
    if !matches!(partition, Partition::Global) {
      bump(&mut channels, key(kind, &Partition::Global));
    }
  }
}

fn key(kind: EntityKind, partition: &Partition) -> ChannelKey {
  (kind, partition.user_id(), partition.year().to_string())
}

fn bump(channels: &mut HashMap<ChannelKey, watch::Sender<u64>>, key: ChannelKey) {
  channels
    .entry(key)
    .or_insert_with(|| watch::channel(0).0)
    .send_modify(|version| *version += 1);
}
