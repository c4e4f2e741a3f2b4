//! Task module
//!
//! This module contains task-related types, storage and the caching service.

mod file_store;
mod model;
mod query;
mod repository;
mod service;
mod sqlite_store;

pub use file_store::FileTaskStore;
pub use model::*;
pub use query::*;
pub use repository::{parse_task_id, TaskRepository};
pub use service::{keys, CacheSettings, TaskService};
pub use sqlite_store::SqliteTaskStore;
