use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;

/// A single task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Todo {
  pub id: i64,
  pub title: String,
  pub completed: bool,
  pub owner_id: i64,
}

impl Todo {
  pub fn apply(&self, patch: &TodoPatch) -> Todo {
    Todo {
      title: patch.title.clone().unwrap_or_else(|| self.title.clone()),
      completed: patch.completed.unwrap_or(self.completed),
      ..self.clone()
    }
  }
}

/// One page of the todo list as served by the API
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TodoPage {
  pub items: Vec<Todo>,
  pub total: u64,
  pub skip: u64,
  pub limit: u64,
}

impl TodoPage {
  /// Reject pages whose items could not be told apart by id.
  pub fn validate(self) -> Result<Self> {
    let mut seen = HashSet::with_capacity(self.items.len());
    for item in &self.items {
      if item.id <= 0 {
        return Err(eyre!("invalid todo id {}", item.id));
      }
      if !seen.insert(item.id) {
        return Err(eyre!("duplicate todo id {}", item.id));
      }
    }
    Ok(self)
  }

  pub fn max_id(&self) -> i64 {
    self.items.iter().map(|t| t.id).max().unwrap_or(0)
  }

  /// Upper bound of ids that may exist on the server, including items
  /// outside this page.
  pub fn highest_known_id(&self) -> i64 {
    let total = i64::try_from(self.total).unwrap_or(i64::MAX);
    self.max_id().max(total)
  }

  pub fn find(&self, id: i64) -> Option<&Todo> {
    self.items.iter().find(|t| t.id == id)
  }
}

/// Input for creating a todo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
  pub title: String,
  pub completed: bool,
  pub owner_id: i64,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
  pub title: Option<String>,
  pub completed: Option<bool>,
}
