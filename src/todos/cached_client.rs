//! Todo operations on top of the query cache.
//!
//! The list is fetched once and never refetched automatically; the demo
//! API does not persist writes, so every mutation keeps its optimistic
//! result and nothing is refetched after it succeeds.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use crate::cache::{
  MutationHandle, QueryClient, QueryError, QueryKey, QueryResult, StaleTime, Subscription, TempIds,
};

use super::client::TodoSource;
use super::types::{NewTodo, Todo, TodoPage, TodoPatch};

/// Cache key of the todo list
pub fn todos_key() -> QueryKey {
  QueryKey::from("todos")
}

/// Todo client with transparent caching and optimistic writes.
#[derive(Clone)]
pub struct TodoService {
  source: Arc<dyn TodoSource>,
  cache: QueryClient<TodoPage>,
  temp_ids: Arc<TempIds>,
  owner_id: i64,
}

impl TodoService {
  pub fn new(source: Arc<dyn TodoSource>, cache: QueryClient<TodoPage>, owner_id: i64) -> Self {
    Self {
      source,
      cache,
      temp_ids: Arc::new(TempIds::new()),
      owner_id,
    }
  }

  pub fn cache(&self) -> &QueryClient<TodoPage> {
    &self.cache
  }

  fn list_fetcher(&self) -> impl Fn() -> BoxFuture<'static, color_eyre::Result<TodoPage>> + Send + Sync {
    let source = Arc::clone(&self.source);
    move || {
      let source = Arc::clone(&source);
      async move { source.fetch_list().await }.boxed()
    }
  }

  /// The cached todo page, fetched on first use.
  pub async fn page(&self) -> Result<TodoPage, QueryError> {
    self
      .cache
      .ensure_fresh(&todos_key(), self.list_fetcher(), StaleTime::Never)
      .await
  }

  /// The cached todo items, fetched on first use.
  pub async fn todos(&self) -> Result<Vec<Todo>, QueryError> {
    self.page().await.map(|page| page.items)
  }

  /// Refetch the list regardless of what is cached.
  pub async fn refresh(&self) -> Result<Vec<Todo>, QueryError> {
    match self.cache.refresh(&todos_key()).await {
      // Nothing fetched the list yet, so there is no fetcher to rerun
      Err(QueryError::Unregistered(_)) => self.todos().await,
      result => result.map(|page| page.items),
    }
  }

  /// Subscribe to the list, fetching it in the background if needed.
  pub fn observe(&self) -> Subscription<TodoPage> {
    self
      .cache
      .observe(&todos_key(), self.list_fetcher(), StaleTime::Never)
  }

  /// Items currently in the cache, without fetching.
  pub fn current(&self) -> Vec<Todo> {
    self
      .cache
      .data(&todos_key())
      .map(|page| page.items)
      .unwrap_or_default()
  }

  pub fn result(&self) -> QueryResult<Vec<Todo>> {
    let result = self.cache.query_result(&todos_key());
    QueryResult {
      data: result.data.map(|page| page.items),
      is_loading: result.is_loading,
      is_refetching: result.is_refetching,
      error: result.error,
    }
  }

  /// Add a new, not yet completed todo owned by the configured user.
  pub fn add(&self, title: impl Into<String>) -> MutationHandle<Todo> {
    self.create(NewTodo {
      title: title.into(),
      completed: false,
      owner_id: self.owner_id,
    })
  }

  /// Create a todo. It is shown immediately under a temporary id that is
  /// kept after the server confirms.
  pub fn create(&self, input: NewTodo) -> MutationHandle<Todo> {
    let temp_ids = Arc::clone(&self.temp_ids);
    let local = input.clone();
    let source = Arc::clone(&self.source);

    self.cache.mutate(
      &[todos_key()],
      move |_, old| {
        let mut page = old.cloned().unwrap_or_default();
        let todo = Todo {
          id: temp_ids.next_after(page.highest_known_id()),
          title: local.title.clone(),
          completed: local.completed,
          owner_id: local.owner_id,
        };
        page.items.insert(0, todo);
        Some(page)
      },
      move || async move { source.create(input).await },
    )
  }

  /// Patch a todo in place.
  pub fn update(&self, id: i64, patch: TodoPatch) -> MutationHandle<Todo> {
    let local = patch.clone();
    let source = Arc::clone(&self.source);

    self.cache.mutate(
      &[todos_key()],
      move |_, old| {
        old.map(|page| TodoPage {
          items: page
            .items
            .iter()
            .map(|todo| if todo.id == id { todo.apply(&local) } else { todo.clone() })
            .collect(),
          ..page.clone()
        })
      },
      move || async move { source.update(id, patch).await },
    )
  }

  pub fn set_completed(&self, id: i64, completed: bool) -> MutationHandle<Todo> {
    self.update(
      id,
      TodoPatch {
        completed: Some(completed),
        ..Default::default()
      },
    )
  }

  pub fn rename(&self, id: i64, title: impl Into<String>) -> MutationHandle<Todo> {
    self.update(
      id,
      TodoPatch {
        title: Some(title.into()),
        ..Default::default()
      },
    )
  }

  /// Remove a todo.
  pub fn delete(&self, id: i64) -> MutationHandle<Todo> {
    let source = Arc::clone(&self.source);

    self.cache.mutate(
      &[todos_key()],
      move |_, old| {
        old.map(|page| TodoPage {
          items: page.items.iter().filter(|todo| todo.id != id).cloned().collect(),
          ..page.clone()
        })
      },
      move || async move { source.remove(id).await },
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, MutationFailed, QueryStatus};
  use async_trait::async_trait;
  use color_eyre::{eyre::eyre, Result};
  use std::collections::HashSet;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::time::Duration;
  use tokio::sync::Notify;

  /// In-memory stand-in for the REST API.
  #[derive(Default)]
  struct FakeSource {
    page: std::sync::Mutex<TodoPage>,
    fetches: AtomicU32,
    fail_writes: AtomicBool,
    /// When set, fetches wait for a notification before answering
    fetch_gate: Option<Arc<Notify>>,
  }

  impl FakeSource {
    fn with_items(items: Vec<Todo>) -> Self {
      let total = items.len() as u64;
      Self {
        page: std::sync::Mutex::new(TodoPage {
          items,
          total,
          skip: 0,
          limit: 20,
        }),
        ..Default::default()
      }
    }
  }

  #[async_trait]
  impl TodoSource for FakeSource {
    async fn fetch_list(&self) -> Result<TodoPage> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.fetch_gate {
        gate.notified().await;
      }
      Ok(self.page.lock().unwrap().clone())
    }

    async fn create(&self, input: NewTodo) -> Result<Todo> {
      tokio::task::yield_now().await;
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(eyre!("failed to create todo"));
      }
      Ok(Todo {
        id: 151,
        title: input.title,
        completed: input.completed,
        owner_id: input.owner_id,
      })
    }

    async fn update(&self, id: i64, patch: TodoPatch) -> Result<Todo> {
      tokio::task::yield_now().await;
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(eyre!("failed to update todo"));
      }
      let page = self.page.lock().unwrap();
      page
        .find(id)
        .map(|todo| todo.apply(&patch))
        .ok_or_else(|| eyre!("failed to update todo"))
    }

    async fn remove(&self, id: i64) -> Result<Todo> {
      tokio::task::yield_now().await;
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(eyre!("failed to delete todo"));
      }
      let page = self.page.lock().unwrap();
      page
        .find(id)
        .cloned()
        .ok_or_else(|| eyre!("failed to delete todo"))
    }
  }

  fn test_todo() -> Todo {
    Todo {
      id: 1,
      title: "Test".to_string(),
      completed: false,
      owner_id: 1,
    }
  }

  fn service(source: Arc<FakeSource>) -> TodoService {
    let cache = QueryClient::new(CacheConfig {
      retry_delay: Duration::ZERO,
      ..Default::default()
    });
    TodoService::new(source, cache, 1)
  }

  #[tokio::test]
  async fn test_list_is_fetched_once() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source.clone());

    let page = service.page().await.unwrap();
    assert_eq!(
      page,
      TodoPage {
        items: vec![test_todo()],
        total: 1,
        skip: 0,
        limit: 20,
      }
    );
    assert_eq!(
      service.cache().get(&todos_key()).unwrap().status,
      QueryStatus::Success
    );

    service.todos().await.unwrap();
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

    service.refresh().await.unwrap();
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_create_keeps_temporary_id() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source);
    service.todos().await.unwrap();

    let handle = service.add("New");

    // Visible before the remote call has had a chance to run
    let items = service.current();
    assert_eq!(items.len(), 2);
    let temp_id = items[0].id;
    assert!(temp_id > 1);
    assert_eq!(items[0].title, "New");
    assert_eq!(items[1], test_todo());

    let created = handle.await.unwrap();
    assert_eq!(created.id, 151);

    // The server's id is not written back
    let items = service.current();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, temp_id);
    assert!(items.iter().all(|t| t.id != 151));
  }

  #[tokio::test]
  async fn test_temporary_id_is_above_unloaded_server_ids() {
    let source = FakeSource::with_items(vec![test_todo()]);
    source.page.lock().unwrap().total = 30;
    let service = service(Arc::new(source));
    service.todos().await.unwrap();

    let handle = service.add("New");
    assert_eq!(service.current()[0].id, 31);
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_create_failure_rolls_back() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    source.fail_writes.store(true, Ordering::SeqCst);
    let service = service(source);
    service.todos().await.unwrap();

    let handle = service.add("New");
    assert_eq!(service.current().len(), 2);

    let result = handle.await;
    assert_eq!(result, Err(MutationFailed::new("failed to create todo")));
    assert_eq!(service.current(), vec![test_todo()]);
  }

  #[tokio::test]
  async fn test_concurrent_creates_get_distinct_ids() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source);
    service.todos().await.unwrap();

    let handles: Vec<_> = (0..10).map(|n| service.add(format!("item {}", n))).collect();
    let items = service.current();
    assert_eq!(items.len(), 11);

    let ids: HashSet<i64> = items.iter().map(|t| t.id).collect();
    assert_eq!(ids.len(), 11);
    assert!(items[..10].iter().all(|t| t.id > 1));

    for handle in handles {
      handle.await.unwrap();
    }
  }

  #[tokio::test]
  async fn test_update_and_delete() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source);
    service.todos().await.unwrap();

    let toggled = service.set_completed(1, true);
    assert!(service.current()[0].completed);
    assert!(toggled.await.unwrap().completed);

    let renamed = service.rename(1, "Renamed");
    assert_eq!(service.current()[0].title, "Renamed");
    renamed.await.unwrap();

    let deleted = service.delete(1);
    assert!(service.current().is_empty());
    deleted.await.unwrap();
    assert!(service.current().is_empty());
  }

  #[tokio::test]
  async fn test_failed_update_and_delete_roll_back() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source.clone());
    service.todos().await.unwrap();
    source.fail_writes.store(true, Ordering::SeqCst);

    let result = service.set_completed(1, true).await;
    assert_eq!(result, Err(MutationFailed::new("failed to update todo")));
    assert_eq!(service.current(), vec![test_todo()]);

    let result = service.delete(1).await;
    assert_eq!(result, Err(MutationFailed::new("failed to delete todo")));
    assert_eq!(service.current(), vec![test_todo()]);
  }

  #[tokio::test]
  async fn test_mutation_supersedes_running_fetch() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(FakeSource {
      fetch_gate: Some(gate.clone()),
      ..FakeSource::with_items(vec![test_todo()])
    });
    let service = service(source.clone());

    // Seed the cache, then start a refetch that stays in flight
    gate.notify_one();
    service.todos().await.unwrap();
    let refetch = {
      let service = service.clone();
      tokio::spawn(async move { service.cache().refresh(&todos_key()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let entry = service.cache().get(&todos_key()).unwrap();
    assert_eq!(entry.status, QueryStatus::Fetching);
    assert!(entry.inflight.is_some());

    let handle = service.add("New");
    assert!(service.cache().get(&todos_key()).unwrap().inflight.is_none());
    assert_eq!(service.current().len(), 2);

    // The stale server list answers after the optimistic write
    gate.notify_one();
    assert_eq!(refetch.await.unwrap(), Err(QueryError::Cancelled));
    handle.await.unwrap();

    assert_eq!(service.current().len(), 2);
    assert_eq!(service.current()[0].title, "New");
  }

  #[tokio::test]
  async fn test_result_maps_items() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source);

    assert_eq!(service.result(), QueryResult::default());
    service.todos().await.unwrap();

    let result = service.result();
    assert_eq!(result.data, Some(vec![test_todo()]));
    assert!(!result.is_loading);
    assert!(result.error.is_none());
  }

  #[tokio::test]
  async fn test_observe_sees_list() {
    let source = Arc::new(FakeSource::with_items(vec![test_todo()]));
    let service = service(source);

    let mut sub = service.observe();
    loop {
      let entry = sub.recv().await.unwrap();
      if entry.is_success() {
        assert_eq!(entry.data.map(|p| p.items), Some(vec![test_todo()]));
        break;
      }
    }
  }
}
