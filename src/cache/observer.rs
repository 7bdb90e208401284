//! Observation layer: per-key change notifications.

use tokio::sync::mpsc;

use super::client::QueryClient;
use super::entry::{QueryEntry, QueryResult};
use super::key::QueryKey;

/// A live subscription to one query key.
///
/// Every change to the entry is delivered, in the order the changes were
/// applied. Dropping the subscription unsubscribes.
pub struct Subscription<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  key: QueryKey,
  id: u64,
  rx: mpsc::UnboundedReceiver<QueryEntry<V>>,
  client: QueryClient<V>,
}

impl<V> QueryClient<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  /// Subscribe to changes of `key`, creating its entry if needed.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription<V> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id();
    self.lock("subscribe").store.add_subscriber(key, id, tx);

    Subscription {
      key: key.clone(),
      id,
      rx,
      client: self.clone(),
    }
  }
}

impl<V> Subscription<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Wait for the next change to the entry.
  pub async fn recv(&mut self) -> Option<QueryEntry<V>> {
    self.rx.recv().await
  }

  /// Take the next change if one is already queued.
  pub fn try_recv(&mut self) -> Option<QueryEntry<V>> {
    self.rx.try_recv().ok()
  }

  /// Current entry, regardless of queued notifications.
  pub fn current(&self) -> QueryEntry<V> {
    self.client.get(&self.key).unwrap_or_default()
  }

  pub fn result(&self) -> QueryResult<V> {
    self.client.query_result(&self.key)
  }
}

impl<V> Drop for Subscription<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  fn drop(&mut self) {
    self
      .client
      .lock("unsubscribe")
      .store
      .remove_subscriber(&self.key, self.id);
  }
}
