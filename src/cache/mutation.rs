//! Mutation executor: optimistic writes, commit and rollback.
//!
//! A mutation runs in two halves. The synchronous half, inside
//! [`QueryClient::mutate`], cancels in-flight fetches for the affected keys,
//! snapshots their entries and applies the optimistic write. The remote call
//! then runs in its own task; when it settles the write is either kept
//! (optionally reconciled) or rolled back to the snapshot.
//!
//! Mutations on the same key are not queued. Each one starts from whatever
//! the store holds when it is invoked, and a failing mutation restores the
//! snapshot it took, even if a later mutation wrote to the key since.

use futures::future::join_all;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::client::{with_data, QueryClient};
use super::entry::{QueryEntry, QueryStatus};
use super::error::MutationFailed;
use super::key::QueryKey;

/// Where a mutation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Idle,
  /// Optimistic write applied, remote call outstanding
  Pending,
  Success,
  /// Remote call failed; the optimistic write has been rolled back
  Error,
  /// Finished; the handle's result is available
  Settled,
}

/// What to do with the cache once a remote write succeeds.
pub enum Reconcile<V, R> {
  /// Keep the optimistic value as final.
  KeepOptimistic,
  /// Replace each affected key's data with `f(key, current, response)`;
  /// `None` leaves that key as it is.
  Replace(Box<dyn Fn(&QueryKey, Option<&V>, &R) -> Option<V> + Send + Sync>),
  /// Refetch every affected key that has a registered fetcher.
  Invalidate,
}

impl<V, R> Default for Reconcile<V, R> {
  fn default() -> Self {
    Reconcile::KeepOptimistic
  }
}

impl<V, R> Reconcile<V, R> {
  pub fn replace<F>(f: F) -> Self
  where
    F: Fn(&QueryKey, Option<&V>, &R) -> Option<V> + Send + Sync + 'static,
  {
    Reconcile::Replace(Box::new(f))
  }
}

/// Per-invocation state, discarded once the mutation settles.
struct MutationContext<V> {
  id: u64,
  /// Pre-write copies of every entry the optimistic write touched
  snapshot: Vec<(QueryKey, QueryEntry<V>)>,
  keys: Vec<QueryKey>,
}

/// Awaitable outcome of a mutation.
///
/// The optimistic write has already been applied when this is returned.
/// Dropping the handle does not stop the remote call or its rollback.
pub struct MutationHandle<R> {
  status: watch::Receiver<MutationStatus>,
  task: JoinHandle<Result<R, MutationFailed>>,
}

impl<R> MutationHandle<R> {
  pub fn status(&self) -> MutationStatus {
    *self.status.borrow()
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }
}

impl<R> Future for MutationHandle<R> {
  type Output = Result<R, MutationFailed>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.task).poll(cx).map(|joined| {
      joined.unwrap_or_else(|e| Err(MutationFailed::new(format!("mutation task failed: {}", e))))
    })
  }
}

impl<V> QueryClient<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  /// Run a mutation that keeps its optimistic write on success.
  ///
  /// `optimistic` is called once per affected key with the key's current
  /// data and returns the optimistic data, or `None` to leave the key alone.
  pub fn mutate<R, U, C, Fut>(&self, keys: &[QueryKey], optimistic: U, remote: C) -> MutationHandle<R>
  where
    U: Fn(&QueryKey, Option<&V>) -> Option<V>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<R>> + Send + 'static,
    R: Send + 'static,
  {
    self.mutate_with(keys, optimistic, remote, Reconcile::KeepOptimistic)
  }

  /// Run a mutation with an explicit reconciliation policy.
  pub fn mutate_with<R, U, C, Fut>(
    &self,
    keys: &[QueryKey],
    optimistic: U,
    remote: C,
    reconcile: Reconcile<V, R>,
  ) -> MutationHandle<R>
  where
    U: Fn(&QueryKey, Option<&V>) -> Option<V>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<R>> + Send + 'static,
    R: Send + 'static,
  {
    let (status_tx, status_rx) = watch::channel(MutationStatus::Idle);
    let context = self.apply_optimistic(keys, optimistic);
    status_tx.send_replace(MutationStatus::Pending);
    debug!(mutation = context.id, keys = context.keys.len(), "mutation pending");

    let call = remote();
    let client = self.clone();
    let task = tokio::spawn(async move {
      let outcome = call.await;
      let result = client.settle_mutation(&context, outcome, reconcile, &status_tx).await;
      status_tx.send_replace(MutationStatus::Settled);
      result
    });

    MutationHandle {
      status: status_rx,
      task,
    }
  }

  /// Cancel, snapshot and write, all under one lock.
  fn apply_optimistic<U>(&self, keys: &[QueryKey], optimistic: U) -> MutationContext<V>
  where
    U: Fn(&QueryKey, Option<&V>) -> Option<V>,
  {
    let id = self.next_id();
    let mut state = self.lock("mutate");
    let mut snapshot = Vec::with_capacity(keys.len());

    for key in keys {
      self.cancel_locked(&mut state, key);

      let before = state.store.get(key).cloned().unwrap_or_default();
      let next = optimistic(key, before.data.as_ref());
      if let Some(data) = next {
        state.store.set(key, |entry| with_data(entry, data));
        snapshot.push((key.clone(), before));
      }
    }

    MutationContext {
      id,
      snapshot,
      keys: keys.to_vec(),
    }
  }

  async fn settle_mutation<R>(
    &self,
    context: &MutationContext<V>,
    outcome: color_eyre::Result<R>,
    reconcile: Reconcile<V, R>,
    status: &watch::Sender<MutationStatus>,
  ) -> Result<R, MutationFailed> {
    match outcome {
      Ok(response) => {
        status.send_replace(MutationStatus::Success);
        match reconcile {
          Reconcile::KeepOptimistic => {}
          Reconcile::Replace(f) => self.reconcile_with(context, &*f, &response),
          Reconcile::Invalidate => self.invalidate(&context.keys).await,
        }
        debug!(mutation = context.id, "mutation succeeded");
        Ok(response)
      }
      Err(e) => {
        status.send_replace(MutationStatus::Error);
        self.rollback(context);
        warn!(mutation = context.id, error = %e, "mutation failed, rolled back");
        Err(MutationFailed::new(e.to_string()))
      }
    }
  }

  fn reconcile_with<R>(
    &self,
    context: &MutationContext<V>,
    f: &(dyn Fn(&QueryKey, Option<&V>, &R) -> Option<V> + Send + Sync),
    response: &R,
  ) {
    let mut state = self.lock("reconcile");
    for key in &context.keys {
      let next = f(key, state.store.get(key).and_then(|e| e.data.as_ref()), response);
      if let Some(data) = next {
        state.store.set(key, |entry| with_data(entry, data));
      }
    }
  }

  async fn invalidate(&self, keys: &[QueryKey]) {
    let refreshes = keys.iter().map(|key| async move {
      if let Err(e) = self.refresh(key).await {
        debug!(key = %key, error = %e, "refetch after mutation did not land");
      }
    });
    join_all(refreshes).await;
  }

  /// Restore every written entry to its snapshot.
  ///
  /// A fetch started after the mutation keeps running and may still land.
  fn rollback(&self, context: &MutationContext<V>) {
    let mut state = self.lock("rollback");
    for (key, before) in &context.snapshot {
      state.store.set(key, |current| {
        let mut restored = QueryEntry {
          inflight: current.inflight,
          stale_time: current.stale_time,
          ..before.clone()
        };
        if restored.inflight.is_some() {
          restored.status = QueryStatus::Fetching;
        } else if restored.status == QueryStatus::Fetching {
          // The snapshot was taken after cancelling its fetch
          restored.status = if restored.data.is_some() {
            QueryStatus::Success
          } else {
            QueryStatus::Idle
          };
        }
        restored
      });
    }
  }
}

/// Issues temporary identifiers for locally created items.
///
/// Every identifier is greater than the largest identifier the caller has
/// seen and greater than every identifier issued before, so two optimistic
/// inserts can never collide with each other or with existing items.
#[derive(Debug, Default)]
pub struct TempIds {
  last: AtomicI64,
}

impl TempIds {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_after(&self, max_seen: i64) -> i64 {
    let previous = match self
      .last
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(last.max(max_seen) + 1)
      }) {
      Ok(previous) | Err(previous) => previous,
    };
    previous.max(max_seen) + 1
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::client::CacheConfig;
  use crate::cache::entry::StaleTime;
  use color_eyre::eyre::eyre;
  use color_eyre::Report;
  use std::collections::HashSet;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::sync::{oneshot, Notify};

  fn client() -> QueryClient<Vec<i64>> {
    QueryClient::new(CacheConfig {
      retry_delay: Duration::ZERO,
      ..Default::default()
    })
  }

  fn push(item: i64) -> impl Fn(&QueryKey, Option<&Vec<i64>>) -> Option<Vec<i64>> {
    move |_, old| {
      let mut next = old.cloned().unwrap_or_default();
      next.push(item);
      Some(next)
    }
  }

  #[tokio::test]
  async fn test_optimistic_write_is_synchronous() {
    let client = client();
    let key = QueryKey::from("todos");
    client.set_query_data(&key, |_| Some(vec![1]));

    let (tx, rx) = oneshot::channel::<()>();
    let handle = client.mutate(&[key.clone()], push(2), move || async move {
      rx.await.map_err(|e| eyre!("{}", e))?;
      Ok::<_, Report>(151)
    });

    assert_eq!(client.data(&key), Some(vec![1, 2]));
    assert_eq!(handle.status(), MutationStatus::Pending);

    tx.send(()).unwrap();
    assert_eq!(handle.await, Ok(151));
    assert_eq!(client.data(&key), Some(vec![1, 2]));
  }

  #[tokio::test]
  async fn test_failure_rolls_back_every_key() {
    let client = client();
    let list = QueryKey::from("todos");
    let detail = list.with(1);
    client.set_query_data(&list, |_| Some(vec![1]));
    client.set_query_data(&detail, |_| Some(vec![10]));
    let before_list = client.get(&list).unwrap();
    let before_detail = client.get(&detail).unwrap();

    let handle = client.mutate(&[list.clone(), detail.clone()], push(2), || async {
      Err::<(), _>(eyre!("failed to create todo"))
    });
    assert_eq!(client.data(&list), Some(vec![1, 2]));
    assert_eq!(client.data(&detail), Some(vec![10, 2]));

    let result = handle.await;
    assert_eq!(result, Err(MutationFailed::new("failed to create todo")));

    let after_list = client.get(&list).unwrap();
    let after_detail = client.get(&detail).unwrap();
    assert!(after_list.same_state(&before_list));
    assert!(after_detail.same_state(&before_detail));
  }

  #[tokio::test]
  async fn test_rollback_of_absent_entry_leaves_it_empty() {
    let client = client();
    let key = QueryKey::from("todos");

    let result = client
      .mutate(&[key.clone()], push(1), || async {
        Err::<(), _>(eyre!("nope"))
      })
      .await;

    assert!(result.is_err());
    let entry = client.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Idle);
    assert!(entry.data.is_none());
  }

  #[tokio::test]
  async fn test_failure_does_not_touch_unrelated_keys() {
    let client = client();
    let todos = QueryKey::from("todos");
    let other = QueryKey::from("other");
    client.set_query_data(&todos, |_| Some(vec![1]));
    client.set_query_data(&other, |_| Some(vec![5]));
    let other_before = client.get(&other).unwrap();

    let _ = client
      .mutate(&[todos.clone()], push(2), || async {
        Err::<(), _>(eyre!("nope"))
      })
      .await;

    assert!(client.get(&other).unwrap().same_state(&other_before));
    assert_eq!(client.data(&todos), Some(vec![1]));
  }

  #[tokio::test]
  async fn test_cancel_lands_before_optimistic_write() {
    let client = client();
    let key = QueryKey::from("todos");
    client.set_query_data(&key, |_| Some(vec![1]));
    let gate = Arc::new(Notify::new());

    // Background refetch that will answer with stale server data
    let fetch = {
      let client = client.clone();
      let key = key.clone();
      let gate = gate.clone();
      tokio::spawn(async move {
        client
          .ensure_fresh(
            &key,
            move || {
              let gate = gate.clone();
              async move {
                gate.notified().await;
                Ok::<_, Report>(vec![1])
              }
            },
            StaleTime::After(Duration::ZERO),
          )
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.get(&key).unwrap().is_fetching());

    let mut sub = client.subscribe(&key);
    let handle = client.mutate(&[key.clone()], push(2), || async { Ok::<_, Report>(()) });

    // The first change observed is the cancellation, then the write
    let cancelled = sub.try_recv().unwrap();
    assert!(cancelled.inflight.is_none());
    assert_eq!(cancelled.data, Some(vec![1]));
    let written = sub.try_recv().unwrap();
    assert_eq!(written.data, Some(vec![1, 2]));

    gate.notify_one();
    assert!(fetch.await.unwrap().is_err());
    handle.await.unwrap();
    assert_eq!(client.data(&key), Some(vec![1, 2]));
  }

  #[tokio::test]
  async fn test_failed_mutation_after_cancelled_fetch_is_not_refetching() {
    let client = client();
    let key = QueryKey::from("todos");
    client.set_query_data(&key, |_| Some(vec![1]));
    let gate = Arc::new(Notify::new());

    let fetch = {
      let client = client.clone();
      let key = key.clone();
      let gate = gate.clone();
      tokio::spawn(async move {
        client
          .ensure_fresh(
            &key,
            move || {
              let gate = gate.clone();
              async move {
                gate.notified().await;
                Ok::<_, Report>(vec![1])
              }
            },
            StaleTime::After(Duration::ZERO),
          )
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.query_result(&key).is_refetching);

    let result = client
      .mutate(&[key.clone()], push(2), || async {
        Err::<(), _>(eyre!("failed to create todo"))
      })
      .await;
    assert!(result.is_err());

    gate.notify_one();
    assert!(fetch.await.unwrap().is_err());

    let entry = client.get(&key).unwrap();
    assert!(entry.inflight.is_none());
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(vec![1]));

    let result = client.query_result(&key);
    assert!(!result.is_loading);
    assert!(!result.is_refetching);
  }

  #[tokio::test]
  async fn test_replace_reconciles_with_response() {
    let client = client();
    let key = QueryKey::from("todos");
    client.set_query_data(&key, |_| Some(vec![1]));

    let handle = client.mutate_with(
      &[key.clone()],
      push(-1),
      || async { Ok::<_, Report>(151_i64) },
      Reconcile::replace(|_, old: Option<&Vec<i64>>, id: &i64| {
        old.map(|items| {
          items
            .iter()
            .map(|&item| if item == -1 { *id } else { item })
            .collect()
        })
      }),
    );

    assert_eq!(handle.await, Ok(151));
    assert_eq!(client.data(&key), Some(vec![1, 151]));
  }

  #[tokio::test]
  async fn test_invalidate_refetches_after_success() {
    let client = client();
    let key = QueryKey::from("todos");
    client
      .ensure_fresh(&key, || async { Ok::<_, Report>(vec![1]) }, StaleTime::Never)
      .await
      .unwrap();

    // Re-register a fetcher that reflects the server-side write
    client
      .ensure_fresh(&key, || async { Ok::<_, Report>(vec![1, 151]) }, StaleTime::Never)
      .await
      .unwrap();

    let handle = client.mutate_with(&[key.clone()], push(2), || async { Ok::<_, Report>(()) }, Reconcile::Invalidate);
    handle.await.unwrap();

    assert_eq!(client.data(&key), Some(vec![1, 151]));
  }

  #[tokio::test]
  async fn test_handle_reports_settled() {
    let client = client();
    let key = QueryKey::from("todos");

    let mut handle = client.mutate(&[key.clone()], push(1), || async { Ok::<_, Report>(()) });
    (&mut handle).await.unwrap();
    assert_eq!(handle.status(), MutationStatus::Settled);
    assert!(handle.is_finished());
  }

  #[tokio::test]
  async fn test_dropped_handle_still_rolls_back() {
    let client = client();
    let key = QueryKey::from("todos");
    client.set_query_data(&key, |_| Some(vec![1]));

    let mut sub = client.subscribe(&key);
    drop(client.mutate(&[key.clone()], push(2), || async {
      tokio::time::sleep(Duration::from_millis(5)).await;
      Err::<(), _>(eyre!("nope"))
    }));

    // Optimistic write, then the rollback
    assert_eq!(sub.recv().await.and_then(|e| e.data), Some(vec![1, 2]));
    assert_eq!(sub.recv().await.and_then(|e| e.data), Some(vec![1]));
  }

  #[test]
  fn test_temp_ids_are_unique_and_above_existing() {
    let ids = TempIds::new();
    let existing = [1_i64, 7, 42];
    let max_seen = *existing.iter().max().unwrap();

    let issued: Vec<i64> = (0..100).map(|_| ids.next_after(max_seen)).collect();
    let unique: HashSet<_> = issued.iter().collect();

    assert_eq!(unique.len(), issued.len());
    assert!(issued.iter().all(|id| *id > max_seen));
  }

  #[test]
  fn test_temp_ids_concurrent() {
    let ids = Arc::new(TempIds::new());
    let threads: Vec<_> = (0..8)
      .map(|_| {
        let ids = ids.clone();
        std::thread::spawn(move || (0..50).map(|_| ids.next_after(10)).collect::<Vec<_>>())
      })
      .collect();

    let all: Vec<i64> = threads
      .into_iter()
      .flat_map(|t| t.join().unwrap())
      .collect();
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), 400);
    assert!(all.iter().all(|id| *id > 10));
  }

  #[test]
  fn test_temp_ids_follow_larger_seen_values() {
    let ids = TempIds::new();
    assert_eq!(ids.next_after(1), 2);
    assert_eq!(ids.next_after(1), 3);
    assert_eq!(ids.next_after(100), 101);
    assert_eq!(ids.next_after(5), 102);
  }
}
