use thiserror::Error;

use super::key::QueryKey;

/// Failure of a query read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  /// The remote read failed after the retry budget was exhausted.
  #[error("fetch failed: {0}")]
  FetchFailed(String),
  /// The fetch was superseded before it settled; its response was discarded.
  #[error("fetch was cancelled")]
  Cancelled,
  /// A refresh was requested for a key that has no registered fetcher.
  #[error("no fetcher registered for {0}")]
  Unregistered(QueryKey),
}

/// Failure of a remote write. The optimistic write has been rolled back
/// by the time a caller sees this.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mutation failed: {message}")]
pub struct MutationFailed {
  pub message: String,
}

impl MutationFailed {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}
