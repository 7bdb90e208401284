//! The cache engine instance shared by queries, mutations and observers.

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use super::entry::{FetchId, QueryEntry, QueryResult, QueryStatus, StaleTime};
use super::error::QueryError;
use super::key::QueryKey;
use super::store::Store;

/// A boxed future resolving to a fetched value
pub(crate) type FetchFuture<V> = Pin<Box<dyn Future<Output = color_eyre::Result<V>> + Send>>;

/// A factory that creates fetch futures, remembered per key for refreshes
pub(crate) type Fetcher<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;

/// A spawned fetch that any number of callers can await
pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

pub(crate) struct InflightFetch<V> {
  pub(crate) id: FetchId,
  pub(crate) task: SharedFetch<V>,
}

/// Everything guarded by the engine lock.
///
/// The lock is only ever held for synchronous sections, never across an
/// await, so each update is applied as one uninterrupted step.
pub(crate) struct State<V> {
  pub(crate) store: Store<V>,
  pub(crate) inflight: HashMap<QueryKey, InflightFetch<V>>,
  pub(crate) fetchers: HashMap<QueryKey, Fetcher<V>>,
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Stale time used by [`QueryClient::observe_default`]
  pub stale_time: StaleTime,
  /// Extra attempts after a failed fetch
  pub retry: u32,
  /// Fixed pause between fetch attempts
  pub retry_delay: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: StaleTime::default(),
      retry: 2,
      retry_delay: Duration::from_secs(1),
    }
  }
}

pub(crate) struct Inner<V> {
  state: Mutex<State<V>>,
  config: CacheConfig,
  next_id: AtomicU64,
}

/// Query cache engine.
///
/// Constructed explicitly and passed to whoever needs it; clones share the
/// same cache. One client holds values of a single type `V`, so each key
/// namespace gets its own typed client.
pub struct QueryClient<V> {
  pub(crate) inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryClient<V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<V> QueryClient<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          store: Store::new(),
          inflight: HashMap::new(),
          fetchers: HashMap::new(),
        }),
        config,
        next_id: AtomicU64::new(1),
      }),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Snapshot of the entry for `key`, if it has ever been observed or written.
  pub fn get(&self, key: &QueryKey) -> Option<QueryEntry<V>> {
    self.lock("get").store.get(key).cloned()
  }

  pub fn has(&self, key: &QueryKey) -> bool {
    self.lock("has").store.has(key)
  }

  /// Current data for `key`, if any.
  pub fn data(&self, key: &QueryKey) -> Option<V> {
    self
      .lock("data")
      .store
      .get(key)
      .and_then(|entry| entry.data.clone())
  }

  /// Reactive read model for `key`; an unknown key reads as idle.
  pub fn query_result(&self, key: &QueryKey) -> QueryResult<V> {
    self
      .lock("query_result")
      .store
      .get(key)
      .map(QueryEntry::result)
      .unwrap_or_default()
  }

  /// Write data for `key` directly.
  ///
  /// `updater` receives the current data and returns the new data, or
  /// `None` to leave the entry untouched. Returns whether the entry changed.
  pub fn set_query_data<F>(&self, key: &QueryKey, updater: F) -> bool
  where
    F: FnOnce(Option<&V>) -> Option<V>,
  {
    let mut state = self.lock("set_query_data");
    let next = updater(state.store.get(key).and_then(|entry| entry.data.as_ref()));
    match next {
      Some(data) => state.store.set(key, |entry| with_data(entry, data)),
      None => false,
    }
  }

  pub(crate) fn next_id(&self) -> u64 {
    self.inner.next_id.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn lock(&self, op: &'static str) -> MutexGuard<'_, State<V>> {
    match self.inner.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(
          op,
          result = "poisoned_recovered",
          "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
      }
    }
  }
}

/// Entry carrying locally written data: successful, no error, fetch
/// timestamp untouched so staleness is unaffected.
pub(crate) fn with_data<V>(entry: QueryEntry<V>, data: V) -> QueryEntry<V> {
  QueryEntry {
    status: QueryStatus::Success,
    data: Some(data),
    error: None,
    updated_at: Some(Utc::now()),
    ..entry
  }
}
