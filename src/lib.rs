//! Terminal task list backed by an optimistic query cache.

pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod event;
pub mod logging;
pub mod todos;
pub mod ui;
