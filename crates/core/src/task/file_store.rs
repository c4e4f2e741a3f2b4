//! File-based task storage implementation
//!
//! Stores every task document in a single JSON file on disk. Documents are
//! held in memory and the whole file is rewritten after each write.
//!
//! The document map is only locked synchronously. Writers take the async
//! `writer` mutex for the whole mutate-then-persist sequence, so file
//! rewrites happen in order and a failed rewrite can be rolled back.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{timestamp_now, NewTask, Task, TaskPatch};
use super::query::{Page, Pagination, TaskFilters, TaskStatistics};
use super::repository::{parse_task_id, TaskRepository};
use crate::{Error, Result};

/// File-based task store using JSON
pub struct FileTaskStore {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory copy of every document
    documents: RwLock<HashMap<Uuid, Task>>,
    /// Serializes writers across the file rewrite
    writer: Mutex<()>,
}

impl FileTaskStore {
    /// Create a new FileTaskStore
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let documents = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let tasks: Vec<Task> = serde_json::from_str(&content)?;
            tasks.into_iter().map(|t| (t.id, t)).collect()
        } else {
            HashMap::new()
        };

        tracing::debug!("Loaded {} task documents from {:?}", documents.len(), path);

        Ok(Self {
            path,
            documents: RwLock::new(documents),
            writer: Mutex::new(()),
        })
    }

    fn read_documents(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, Task>>> {
        self.documents
            .read()
            .map_err(|_| Error::Storage("task documents lock poisoned".to_string()))
    }

    fn write_documents(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, Task>>> {
        self.documents
            .write()
            .map_err(|_| Error::Storage("task documents lock poisoned".to_string()))
    }

    /// Serialized snapshot of the current document set
    fn snapshot(&self) -> Result<String> {
        let documents = self.read_documents()?;
        let mut tasks: Vec<&Task> = documents.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(serde_json::to_string_pretty(&tasks)?)
    }

    /// Write the document set to disk; callers hold `writer`
    async fn persist(&self) -> Result<()> {
        let content = self.snapshot()?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Persist, restoring `id` to `previous` if the write fails
    async fn persist_or_restore(&self, id: Uuid, previous: Option<Task>) -> Result<()> {
        let result = self.persist().await;
        if result.is_err() {
            let mut documents = self.write_documents()?;
            match previous {
                Some(task) => documents.insert(id, task),
                None => documents.remove(&id),
            };
        }
        result
    }
}

#[async_trait]
impl TaskRepository for FileTaskStore {
    async fn create(&self, input: NewTask) -> Result<Task> {
        let task = Task::from_new(input, timestamp_now());
        let _writer = self.writer.lock().await;
        {
            let mut documents = self.write_documents()?;
            if documents.contains_key(&task.id) {
                return Err(Error::Conflict(format!(
                    "Task with ID {} already exists",
                    task.id
                )));
            }
            documents.insert(task.id, task.clone());
        }
        self.persist_or_restore(task.id, None).await?;
        tracing::info!("Task created: {}", task.id);
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let Some(id) = parse_task_id(id) else {
            return Ok(None);
        };
        Ok(self.read_documents()?.get(&id).cloned())
    }

    async fn find_all(&self, filters: &TaskFilters, pagination: &Pagination) -> Result<Page<Task>> {
        let filters = filters.normalized();
        let documents = self.read_documents()?;
        let mut matching: Vec<&Task> = documents.values().filter(|t| filters.matches(t)).collect();
        matching.sort_by(|a, b| pagination.compare(a, b));

        let total = matching.len() as u64;
        let skip = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let data = matching
            .into_iter()
            .skip(skip)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(Page::new(data, total, pagination))
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>> {
        let Some(id) = parse_task_id(id) else {
            return Ok(None);
        };
        let _writer = self.writer.lock().await;
        let (previous, task) = {
            let mut documents = self.write_documents()?;
            let Some(previous) = documents.get(&id).cloned() else {
                return Ok(None);
            };
            let mut task = previous.clone();
            task.apply(patch, timestamp_now());
            documents.insert(id, task.clone());
            (previous, task)
        };
        self.persist_or_restore(id, Some(previous)).await?;
        tracing::info!("Task updated: {}", id);
        Ok(Some(task))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(id) = parse_task_id(id) else {
            return Ok(false);
        };
        let _writer = self.writer.lock().await;
        let removed = self.write_documents()?.remove(&id);
        let Some(removed) = removed else {
            return Ok(false);
        };
        self.persist_or_restore(id, Some(removed)).await?;
        tracing::info!("Task deleted: {}", id);
        Ok(true)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let Some(id) = parse_task_id(id) else {
            return Ok(false);
        };
        Ok(self.read_documents()?.contains_key(&id))
    }

    async fn statistics(&self) -> Result<TaskStatistics> {
        let documents = self.read_documents()?;
        let mut stats = TaskStatistics {
            total: documents.len() as u64,
            ..TaskStatistics::default()
        };
        for task in documents.values() {
            *stats.by_status.entry(task.status.to_string()).or_insert(0) += 1;
            *stats.by_priority.entry(task.priority.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{SortField, SortOrder, TaskPriority, TaskStatus};
    use tempfile::TempDir;

    async fn create_test_store() -> (FileTaskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks.json");
        let store = FileTaskStore::new(&path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_create_task() {
        let (store, _temp) = create_test_store().await;

        let created = store
            .create(NewTask::new("Test task").with_description("A test description"))
            .await
            .unwrap();

        assert_eq!(created.title, "Test task");
        assert_eq!(created.description, "A test description");
        assert_eq!(created.created_at, created.updated_at);
    }

    #[tokio::test]
    async fn test_get_task() {
        let (store, _temp) = create_test_store().await;

        let id = store.create(NewTask::new("Test task")).await.unwrap().id;

        let retrieved = store.find_by_id(&id.to_string()).await.unwrap();
        assert_eq!(retrieved.unwrap().id, id);

        // Test non-existent task
        let non_existent = store.find_by_id(&Uuid::new_v4().to_string()).await.unwrap();
        assert!(non_existent.is_none());

        // Malformed id is a plain miss
        assert!(store.find_by_id("not-a-uuid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_tasks_paginated() {
        let (store, _temp) = create_test_store().await;

        for i in 0..25 {
            store.create(NewTask::new(format!("Task {:02}", i))).await.unwrap();
        }

        let pagination = Pagination::new(3, 10).sorted(SortField::Title, SortOrder::Asc);
        let page = store.find_all(&TaskFilters::default(), &pagination).await.unwrap();
        assert_eq!(page.data.len(), 5);
        assert_eq!(page.data[0].title, "Task 20");
        assert_eq!(page.pagination.total, 25);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(!page.pagination.has_next_page);
        assert!(page.pagination.has_prev_page);
    }

    #[tokio::test]
    async fn test_update_task() {
        let (store, _temp) = create_test_store().await;

        let id = store.create(NewTask::new("Original title")).await.unwrap().id.to_string();

        let patch = TaskPatch {
            title: Some("Updated title".to_string()),
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        let result = store.update(&id, patch).await.unwrap().unwrap();
        assert_eq!(result.title, "Updated title");
        assert_eq!(result.status, TaskStatus::InProgress);
        assert!(result.updated_at >= result.created_at);

        // Verify persistence
        let retrieved = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(retrieved.title, "Updated title");
    }

    #[tokio::test]
    async fn test_update_nonexistent_task() {
        let (store, _temp) = create_test_store().await;

        let patch = TaskPatch {
            title: Some("x".to_string()),
            ..TaskPatch::default()
        };
        let result = store.update(&Uuid::new_v4().to_string(), patch).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (store, _temp) = create_test_store().await;

        let id = store.create(NewTask::new("Task to delete")).await.unwrap().id.to_string();

        assert!(store.exists(&id).await.unwrap());
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());

        // Delete again should return false
        assert!(!store.delete(&id).await.unwrap());
        assert!(!store.delete("garbage").await.unwrap());
    }

    #[tokio::test]
    async fn test_statistics() {
        let (store, _temp) = create_test_store().await;

        store.create(NewTask::new("Todo 1")).await.unwrap();
        store.create(NewTask::new("Todo 2")).await.unwrap();
        store
            .create(
                NewTask::new("Done 1")
                    .with_status(TaskStatus::Completed)
                    .with_priority(TaskPriority::Urgent),
            )
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.status_count(TaskStatus::Pending), 2);
        assert_eq!(stats.status_count(TaskStatus::Completed), 1);
        assert_eq!(stats.status_count(TaskStatus::Cancelled), 0);
        assert!(!stats.by_status.contains_key("cancelled"));
        assert_eq!(stats.priority_count(TaskPriority::Urgent), 1);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("tasks.json");

        let task_id;

        // Create store and add task
        {
            let store = FileTaskStore::new(&path).await.unwrap();
            let task = store
                .create(
                    NewTask::new("Persistent task")
                        .with_description("Should survive reload")
                        .with_priority(TaskPriority::High)
                        .with_tags(vec!["keep"]),
                )
                .await
                .unwrap();
            task_id = task.id;
        }

        // Create new store instance and verify data persisted
        {
            let store = FileTaskStore::new(&path).await.unwrap();
            let task = store.find_by_id(&task_id.to_string()).await.unwrap().unwrap();
            assert_eq!(task.title, "Persistent task");
            assert_eq!(task.description, "Should survive reload");
            assert_eq!(task.priority, TaskPriority::High);
            assert_eq!(task.tags, vec!["keep".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_failed_write_is_rolled_back() {
        let (store, temp) = create_test_store().await;
        let kept = store.create(NewTask::new("kept")).await.unwrap();

        // A directory where the file should be makes every rewrite fail
        let path = temp.path().join("tasks.json");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.create(NewTask::new("lost")).await.is_err());
        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        assert!(store.update(&kept.id.to_string(), patch).await.is_err());
        assert!(store.delete(&kept.id.to_string()).await.is_err());

        let page = store
            .find_all(&TaskFilters::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.data[0], kept);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_all_reach_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks.json");
        let store = std::sync::Arc::new(FileTaskStore::new(&path).await.unwrap());

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.create(NewTask::new(format!("task {}", i))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reloaded = FileTaskStore::new(&path).await.unwrap();
        assert_eq!(reloaded.statistics().await.unwrap().total, 20);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let (store, _temp) = create_test_store().await;
        store.create(NewTask::new("ÉCOLE visit")).await.unwrap();
        store.create(NewTask::new("office")).await.unwrap();

        let filters = TaskFilters {
            search: Some("école".to_string()),
            ..TaskFilters::default()
        };
        let page = store.find_all(&filters, &Pagination::default()).await.unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.data[0].title, "ÉCOLE visit");
    }
}
