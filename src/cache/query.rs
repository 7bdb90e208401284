//! Query executor: de-duplicated, cancellable fetches into the store.
//!
//! Inspired by TanStack Query. A fetch runs in its own task and is shared, so
//! every caller asking for the same key while it runs awaits the same result.
//! Each fetch carries a [`FetchId`]; its response only lands if that id is
//! still the entry's in-flight request when it settles.
//!
//! # Example
//!
//! ```ignore
//! let source = source.clone();
//! let todos = client
//!     .ensure_fresh(&key, move || {
//!         let source = source.clone();
//!         async move { source.fetch_list().await }
//!     }, StaleTime::Never)
//!     .await?;
//! ```

use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::client::{FetchFuture, Fetcher, InflightFetch, QueryClient, SharedFetch, State};
use super::entry::{FetchId, QueryEntry, QueryStatus, StaleTime};
use super::error::QueryError;
use super::key::QueryKey;
use super::observer::Subscription;

impl<V> QueryClient<V>
where
  V: Clone + PartialEq + Send + Sync + 'static,
{
  /// Return data for `key`, fetching it if it is missing, failed or stale.
  ///
  /// If a fetch for `key` is already running this attaches to it instead of
  /// starting another. The fetcher is remembered so [`QueryClient::refresh`]
  /// can re-run it. Fetch failures are also recorded in the entry, so
  /// observers see them whether or not the caller looks at the result.
  pub async fn ensure_fresh<F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    stale_time: StaleTime,
  ) -> Result<V, QueryError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = color_eyre::Result<V>> + Send + 'static,
  {
    let fetcher: Fetcher<V> = Arc::new(move || -> FetchFuture<V> { Box::pin(fetcher()) });

    let task = {
      let mut state = self.lock("ensure_fresh");
      state.fetchers.insert(key.clone(), Arc::clone(&fetcher));
      state
        .store
        .set(key, |entry| QueryEntry { stale_time, ..entry });

      if let Some(inflight) = state.inflight.get(key) {
        debug!(key = %key, fetch = inflight.id.0, "attaching to in-flight fetch");
        inflight.task.clone()
      } else {
        let needs_fetch = state
          .store
          .get(key)
          .map(|entry| entry.needs_fetch(Instant::now()))
          .unwrap_or(true);

        if !needs_fetch {
          return state
            .store
            .get(key)
            .and_then(|entry| entry.data.clone())
            .ok_or(QueryError::Cancelled);
        }
        self.start_fetch(&mut state, key, fetcher)
      }
    };

    task.await
  }

  /// Force a fetch for `key` regardless of freshness.
  ///
  /// Supersedes any fetch already in flight for the key. Uses the fetcher
  /// registered by the last `ensure_fresh`/`observe` call for the key.
  pub async fn refresh(&self, key: &QueryKey) -> Result<V, QueryError> {
    let task = {
      let mut state = self.lock("refresh");
      let fetcher = state
        .fetchers
        .get(key)
        .cloned()
        .ok_or_else(|| QueryError::Unregistered(key.clone()))?;
      self.cancel_locked(&mut state, key);
      self.start_fetch(&mut state, key, fetcher)
    };

    task.await
  }

  /// Supersede the in-flight fetch for `key`, if any.
  ///
  /// The fetch keeps running but its response will be discarded. Status
  /// and data are left as they are. Returns whether a fetch was cancelled.
  pub fn cancel(&self, key: &QueryKey) -> bool {
    let mut state = self.lock("cancel");
    self.cancel_locked(&mut state, key)
  }

  /// Subscribe to `key` and make sure its data is fresh.
  ///
  /// The fetch runs in the background; its outcome reaches the returned
  /// subscription as entry updates.
  pub fn observe<F, Fut>(&self, key: &QueryKey, fetcher: F, stale_time: StaleTime) -> Subscription<V>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = color_eyre::Result<V>> + Send + 'static,
  {
    let subscription = self.subscribe(key);
    let client = self.clone();
    let key = key.clone();
    tokio::spawn(async move {
      if let Err(e) = client.ensure_fresh(&key, fetcher, stale_time).await {
        debug!(key = %key, error = %e, "background fetch did not land");
      }
    });
    subscription
  }

  /// [`QueryClient::observe`] with the engine's default stale time.
  pub fn observe_default<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Subscription<V>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = color_eyre::Result<V>> + Send + 'static,
  {
    let stale_time = self.config().stale_time;
    self.observe(key, fetcher, stale_time)
  }

  pub(crate) fn cancel_locked(&self, state: &mut State<V>, key: &QueryKey) -> bool {
    let removed = state.inflight.remove(key);
    let had_inflight = state
      .store
      .get(key)
      .map(|entry| entry.inflight.is_some())
      .unwrap_or(false);

    if had_inflight {
      state
        .store
        .set(key, |entry| QueryEntry {
          inflight: None,
          ..entry
        });
    }

    if let Some(fetch) = &removed {
      debug!(key = %key, fetch = fetch.id.0, "cancelled in-flight fetch");
    }
    removed.is_some() || had_inflight
  }

  /// Mark `key` as fetching under a new id and spawn the fetch.
  fn start_fetch(&self, state: &mut State<V>, key: &QueryKey, fetcher: Fetcher<V>) -> SharedFetch<V> {
    let id = FetchId(self.next_id());
    state.store.set(key, |entry| QueryEntry {
      status: QueryStatus::Fetching,
      inflight: Some(id),
      ..entry
    });
    debug!(key = %key, fetch = id.0, "starting fetch");

    let client = self.clone();
    let fetch_key = key.clone();
    let handle = tokio::spawn(async move { client.run_fetch(fetch_key, id, fetcher).await });

    let task = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(QueryError::FetchFailed(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    state.inflight.insert(
      key.clone(),
      InflightFetch {
        id,
        task: task.clone(),
      },
    );
    task
  }

  async fn run_fetch(self, key: QueryKey, id: FetchId, fetcher: Fetcher<V>) -> Result<V, QueryError> {
    let retry = self.config().retry;
    let retry_delay = self.config().retry_delay;
    let mut attempt = 0;

    let outcome = loop {
      match fetcher().await {
        Ok(data) => break Ok(data),
        Err(e) if attempt < retry => {
          attempt += 1;
          warn!(key = %key, fetch = id.0, attempt, error = %e, "fetch failed, retrying");
          tokio::time::sleep(retry_delay).await;
          if !self.is_current(&key, id) {
            return Err(QueryError::Cancelled);
          }
        }
        Err(e) => break Err(e.to_string()),
      }
    };

    self.settle_fetch(&key, id, outcome)
  }

  fn is_current(&self, key: &QueryKey, id: FetchId) -> bool {
    self
      .lock("is_current")
      .store
      .get(key)
      .and_then(|entry| entry.inflight)
      == Some(id)
  }

  /// Apply a fetch outcome, unless the fetch has been superseded.
  fn settle_fetch(
    &self,
    key: &QueryKey,
    id: FetchId,
    outcome: Result<V, String>,
  ) -> Result<V, QueryError> {
    let mut state = self.lock("settle_fetch");

    let current = state.store.get(key).and_then(|entry| entry.inflight);
    if current != Some(id) {
      debug!(key = %key, fetch = id.0, "discarding response from superseded fetch");
      return Err(QueryError::Cancelled);
    }
    if state.inflight.get(key).map(|fetch| fetch.id) == Some(id) {
      state.inflight.remove(key);
    }

    match outcome {
      Ok(data) => {
        state.store.set(key, |entry| QueryEntry {
          status: QueryStatus::Success,
          data: Some(data.clone()),
          error: None,
          fetched_at: Some(Instant::now()),
          updated_at: Some(Utc::now()),
          inflight: None,
          ..entry
        });
        debug!(key = %key, fetch = id.0, "fetch succeeded");
        Ok(data)
      }
      Err(message) => {
        state.store.set(key, |entry| QueryEntry {
          status: QueryStatus::Error,
          data: None,
          error: Some(message.clone()),
          inflight: None,
          ..entry
        });
        warn!(key = %key, fetch = id.0, error = %message, "fetch failed");
        Err(QueryError::FetchFailed(message))
      }
    }
  }
}
