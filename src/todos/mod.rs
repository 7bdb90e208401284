//! Task list domain: wire types, the REST client and the cached service.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cached_client::{todos_key, TodoService};
pub use client::{HttpTodoClient, TodoSource};
pub use types::{NewTodo, Todo, TodoPage, TodoPatch};
