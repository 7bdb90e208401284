//! Query/mutation cache engine.
//!
//! This module is domain-agnostic. It:
//! - Caches the result of a remote read per [`QueryKey`], one fetch in flight per key
//! - Serves cached data to any number of observers and tells them about changes
//! - Applies optimistic writes before a remote mutation completes
//! - Rolls those writes back when the mutation fails
//!
//! The store is memory-resident and lives as long as its [`QueryClient`].

mod client;
mod entry;
mod error;
mod key;
mod mutation;
mod observer;
mod query;
mod store;

pub use client::{CacheConfig, QueryClient};
pub use entry::{FetchId, QueryEntry, QueryResult, QueryStatus, StaleTime};
pub use error::{MutationFailed, QueryError};
pub use key::{KeyPart, QueryKey};
pub use mutation::{MutationHandle, MutationStatus, Reconcile, TempIds};
pub use observer::Subscription;
pub use store::Store;
