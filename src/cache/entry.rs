//! Cache entry state, one per query key.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Identity of a single fetch, used for de-duplication and to discard
/// responses from superseded fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchId(pub(crate) u64);

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Observed but never fetched
  #[default]
  Idle,
  /// A fetch is (or was, until cancelled) in progress
  Fetching,
  /// Data is available
  Success,
  /// The last fetch failed after exhausting retries
  Error,
}

/// How long fetched data stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTime {
  After(Duration),
  /// Never refetch automatically; only an explicit refresh refetches.
  Never,
}

impl Default for StaleTime {
  fn default() -> Self {
    StaleTime::After(Duration::ZERO)
  }
}

/// State of one cached resource.
#[derive(Debug, Clone)]
pub struct QueryEntry<V> {
  pub status: QueryStatus,
  /// Last known value, kept while refetching
  pub data: Option<V>,
  /// Last failure message, only in `Error`
  pub error: Option<String>,
  /// When the last successful fetch landed
  pub fetched_at: Option<Instant>,
  /// Wall-clock time of the last data change, for display
  pub updated_at: Option<DateTime<Utc>>,
  pub stale_time: StaleTime,
  /// The fetch whose response is allowed to land, if any
  pub inflight: Option<FetchId>,
  pub subscriber_count: usize,
}

impl<V> Default for QueryEntry<V> {
  fn default() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      updated_at: None,
      stale_time: StaleTime::default(),
      inflight: None,
      subscriber_count: 0,
    }
  }
}

impl<V> QueryEntry<V> {
  pub fn is_fetching(&self) -> bool {
    self.status == QueryStatus::Fetching
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Check if successful data is older than the entry's stale time.
  pub fn is_stale(&self, now: Instant) -> bool {
    if self.status != QueryStatus::Success {
      return false;
    }
    match self.stale_time {
      StaleTime::Never => false,
      StaleTime::After(stale_time) => self
        .fetched_at
        .map(|t| now.saturating_duration_since(t) > stale_time)
        .unwrap_or(true),
    }
  }

  /// Whether an automatic fetch should start for this entry.
  ///
  /// A `Fetching` entry without an in-flight request had its fetch
  /// cancelled and nothing replaced it, so it is refetchable.
  pub fn needs_fetch(&self, now: Instant) -> bool {
    if self.inflight.is_some() {
      return false;
    }
    match self.status {
      QueryStatus::Idle | QueryStatus::Error | QueryStatus::Fetching => true,
      QueryStatus::Success => self.is_stale(now),
    }
  }
}

impl<V: PartialEq> QueryEntry<V> {
  /// Value comparison that ignores the subscriber count.
  pub fn same_state(&self, other: &Self) -> bool {
    self.status == other.status
      && self.data == other.data
      && self.error == other.error
      && self.fetched_at == other.fetched_at
      && self.updated_at == other.updated_at
      && self.stale_time == other.stale_time
      && self.inflight == other.inflight
  }
}

impl<V: Clone> QueryEntry<V> {
  /// Reactive read model for the presentation layer.
  ///
  /// Loading flags follow the in-flight request, not the status: a
  /// cancelled fetch leaves `Fetching` behind with nothing running.
  pub fn result(&self) -> QueryResult<V> {
    let fetching = self.is_fetching() && self.inflight.is_some();
    QueryResult {
      data: self.data.clone(),
      is_loading: fetching && self.data.is_none(),
      is_refetching: fetching && self.data.is_some(),
      error: self.error.clone(),
    }
  }
}

/// What an observer renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<V> {
  pub data: Option<V>,
  /// Fetching with nothing to show yet
  pub is_loading: bool,
  /// Fetching while showing previous data
  pub is_refetching: bool,
  pub error: Option<String>,
}

impl<V> Default for QueryResult<V> {
  fn default() -> Self {
    Self {
      data: None,
      is_loading: false,
      is_refetching: false,
      error: None,
    }
  }
}
