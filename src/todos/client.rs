use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ApiConfig;
use crate::todos::api_types::{ApiDeletedTodo, ApiNewTodo, ApiTodo, ApiTodoPatch, ApiTodosResponse};
use crate::todos::types::{NewTodo, Todo, TodoPage, TodoPatch};

/// Remote source of todos.
///
/// Every failure is a single message; callers do not distinguish network
/// errors from rejections.
#[async_trait]
pub trait TodoSource: Send + Sync {
  async fn fetch_list(&self) -> Result<TodoPage>;

  async fn create(&self, input: NewTodo) -> Result<Todo>;

  async fn update(&self, id: i64, patch: TodoPatch) -> Result<Todo>;

  async fn remove(&self, id: i64) -> Result<Todo>;
}

/// HTTP client for the todo REST API
#[derive(Clone)]
pub struct HttpTodoClient {
  http: reqwest::Client,
  base_url: String,
  limit: u32,
}

impl HttpTodoClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      limit: config.limit,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

/// Turn a response into `T`, failing with `message` on a non-success status.
async fn parse<T: DeserializeOwned>(response: Response, message: &str) -> Result<T> {
  if !response.status().is_success() {
    debug!(status = %response.status(), "{}", message);
    return Err(eyre!("{}", message));
  }
  response
    .json::<T>()
    .await
    .map_err(|e| eyre!("{}: {}", message, e))
}

#[async_trait]
impl TodoSource for HttpTodoClient {
  async fn fetch_list(&self) -> Result<TodoPage> {
    const MESSAGE: &str = "failed to load todos";

    let response = self
      .http
      .get(self.url(&format!("/todos?limit={}", self.limit)))
      .send()
      .await
      .map_err(|e| eyre!("{}: {}", MESSAGE, e))?;

    let body: ApiTodosResponse = parse(response, MESSAGE).await?;
    body
      .into_page()
      .validate()
      .map_err(|e| eyre!("{}: {}", MESSAGE, e))
  }

  async fn create(&self, input: NewTodo) -> Result<Todo> {
    const MESSAGE: &str = "failed to create todo";

    let response = self
      .http
      .post(self.url("/todos/add"))
      .json(&ApiNewTodo::from(&input))
      .send()
      .await
      .map_err(|e| eyre!("{}: {}", MESSAGE, e))?;

    let todo: ApiTodo = parse(response, MESSAGE).await?;
    Ok(todo.into())
  }

  async fn update(&self, id: i64, patch: TodoPatch) -> Result<Todo> {
    const MESSAGE: &str = "failed to update todo";

    let response = self
      .http
      .put(self.url(&format!("/todos/{}", id)))
      .json(&ApiTodoPatch::from(&patch))
      .send()
      .await
      .map_err(|e| eyre!("{}: {}", MESSAGE, e))?;

    let todo: ApiTodo = parse(response, MESSAGE).await?;
    Ok(todo.into())
  }

  async fn remove(&self, id: i64) -> Result<Todo> {
    const MESSAGE: &str = "failed to delete todo";

    let response = self
      .http
      .delete(self.url(&format!("/todos/{}", id)))
      .send()
      .await
      .map_err(|e| eyre!("{}: {}", MESSAGE, e))?;

    let deleted: ApiDeletedTodo = parse(response, MESSAGE).await?;
    if !deleted.is_deleted {
      debug!(id, "server did not confirm deletion");
      return Err(eyre!("{}", MESSAGE));
    }
    Ok(deleted.todo.into())
  }
}
