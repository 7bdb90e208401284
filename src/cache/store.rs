//! In-memory query cache store.
//!
//! Holds one [`QueryEntry`] per [`QueryKey`] together with the channels of
//! everyone observing that key. Entries live for the lifetime of the store.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

use super::entry::QueryEntry;
use super::key::QueryKey;

pub(crate) type SubscriberId = u64;

struct Slot<V> {
  entry: QueryEntry<V>,
  subscribers: Vec<(SubscriberId, mpsc::UnboundedSender<QueryEntry<V>>)>,
}

impl<V> Default for Slot<V> {
  fn default() -> Self {
    Self {
      entry: QueryEntry::default(),
      subscribers: Vec::new(),
    }
  }
}

/// Query cache store.
///
/// All entry changes go through [`Store::set`]. Observers are notified from
/// inside `set`, so for a single key they see changes in the order the
/// updates were applied.
pub struct Store<V> {
  slots: HashMap<QueryKey, Slot<V>>,
}

impl<V> Default for Store<V> {
  fn default() -> Self {
    Self {
      slots: HashMap::new(),
    }
  }
}

impl<V: Clone + PartialEq> Store<V> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &QueryKey) -> Option<&QueryEntry<V>> {
    self.slots.get(key).map(|slot| &slot.entry)
  }

  pub fn has(&self, key: &QueryKey) -> bool {
    self.slots.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.slots.keys()
  }

  /// Replace the entry for `key` with `updater(current)`.
  ///
  /// The entry is created from its default if absent. Observers are
  /// notified only when the new entry differs from the old one by value.
  /// Returns whether anything changed.
  pub fn set<F>(&mut self, key: &QueryKey, updater: F) -> bool
  where
    F: FnOnce(QueryEntry<V>) -> QueryEntry<V>,
  {
    let slot = self.slots.entry(key.clone()).or_default();
    let mut next = updater(slot.entry.clone());
    next.subscriber_count = slot.subscribers.len();

    if next.same_state(&slot.entry) {
      return false;
    }

    slot.entry = next;
    trace!(key = %key, status = ?slot.entry.status, "cache entry updated");
    Self::notify(slot);
    true
  }

  fn notify(slot: &mut Slot<V>) {
    let entry = &slot.entry;
    slot
      .subscribers
      .retain(|(_, tx)| tx.send(entry.clone()).is_ok());
    slot.entry.subscriber_count = slot.subscribers.len();
  }

  pub(crate) fn add_subscriber(
    &mut self,
    key: &QueryKey,
    id: SubscriberId,
    tx: mpsc::UnboundedSender<QueryEntry<V>>,
  ) -> QueryEntry<V> {
    let slot = self.slots.entry(key.clone()).or_default();
    slot.subscribers.push((id, tx));
    slot.entry.subscriber_count = slot.subscribers.len();
    slot.entry.clone()
  }

  pub(crate) fn remove_subscriber(&mut self, key: &QueryKey, id: SubscriberId) {
    if let Some(slot) = self.slots.get_mut(key) {
      slot.subscribers.retain(|(sub, _)| *sub != id);
      slot.entry.subscriber_count = slot.subscribers.len();
    }
  }
}
