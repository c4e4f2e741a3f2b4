//! Task repository trait
//!
//! Defines the interface for task storage operations. Identifiers arrive as
//! raw strings; one that is not a well-formed UUID is treated as absent.

use async_trait::async_trait;
use uuid::Uuid;

use super::model::{NewTask, Task, TaskPatch};
use super::query::{Page, Pagination, TaskFilters, TaskStatistics};
use crate::Result;

/// Repository interface for task CRUD and listing
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task with a fresh id; both timestamps are set to the same instant
    async fn create(&self, input: NewTask) -> Result<Task>;

    /// Get a task by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;

    /// Filter, sort and page
    async fn find_all(&self, filters: &TaskFilters, pagination: &Pagination) -> Result<Page<Task>>;

    /// Apply a partial update; `None` when the task does not exist
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>>;

    /// Delete a task by ID, returning whether anything was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Total plus counts grouped by status and by priority
    async fn statistics(&self) -> Result<TaskStatistics>;

    /// Liveness check of the underlying store
    async fn health_check(&self) -> Result<()>;
}

/// Parse a raw identifier, yielding `None` for anything that is not a UUID
pub fn parse_task_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}
