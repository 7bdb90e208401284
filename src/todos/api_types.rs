//! Serde types matching the todo API's JSON.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Serialize};

use super::types::{NewTodo, Todo, TodoPage, TodoPatch};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiTodo {
  pub id: i64,
  pub todo: String,
  pub completed: bool,
  #[serde(rename = "userId")]
  pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiTodosResponse {
  #[serde(default)]
  pub todos: Vec<ApiTodo>,
  pub total: u64,
  pub skip: u64,
  pub limit: u64,
}

/// Body of `POST /todos/add`
#[derive(Debug, Serialize)]
pub struct ApiNewTodo {
  pub todo: String,
  pub completed: bool,
  #[serde(rename = "userId")]
  pub user_id: i64,
}

/// Body of `PUT /todos/{id}`; absent fields are left unchanged.
#[derive(Debug, Serialize)]
pub struct ApiTodoPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub todo: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

/// Response of `DELETE /todos/{id}`
#[derive(Debug, Deserialize)]
pub struct ApiDeletedTodo {
  #[serde(flatten)]
  pub todo: ApiTodo,
  #[serde(rename = "isDeleted", default)]
  pub is_deleted: bool,
}

impl From<ApiTodo> for Todo {
  fn from(api: ApiTodo) -> Self {
    Todo {
      id: api.id,
      title: api.todo,
      completed: api.completed,
      owner_id: api.user_id,
    }
  }
}

impl ApiTodosResponse {
  pub fn into_page(self) -> TodoPage {
    TodoPage {
      items: self.todos.into_iter().map(Todo::from).collect(),
      total: self.total,
      skip: self.skip,
      limit: self.limit,
    }
  }
}

impl From<&NewTodo> for ApiNewTodo {
  fn from(input: &NewTodo) -> Self {
    ApiNewTodo {
      todo: input.title.clone(),
      completed: input.completed,
      user_id: input.owner_id,
    }
  }
}

impl From<&TodoPatch> for ApiTodoPatch {
  fn from(patch: &TodoPatch) -> Self {
    ApiTodoPatch {
      todo: patch.title.clone(),
      completed: patch.completed,
    }
  }
}
