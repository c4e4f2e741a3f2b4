//! Cache-aside task service
//!
//! Reads check the cache first and populate it on a miss. Writes go to the
//! repository, refresh or drop the per-task entry, then drop every cached
//! listing and the statistics entry in one pattern delete.
//!
//! The cache is never allowed to fail a request: its errors are logged and
//! treated as a miss or a no-op. Repository errors always propagate.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::model::{NewTask, Task, TaskPatch};
use super::query::{Page, Pagination, TaskFilters, TaskStatistics};
use super::repository::{parse_task_id, TaskRepository};
use crate::cache::Cache;
use crate::{Error, Result};

/// Cache key layout
pub mod keys {
    use serde::Serialize;
    use sha2::{Digest, Sha256};
    use uuid::Uuid;

    use crate::task::{Pagination, TaskFilters};

    /// Statistics entry; also covered by [`INVALIDATE_PATTERN`]
    pub const STATS: &str = "tasks:stats";
    /// Every listing and the statistics entry, never per-task entries
    pub const INVALIDATE_PATTERN: &str = "tasks:*";

    pub fn task(id: &Uuid) -> String {
        format!("task:{}", id)
    }

    #[derive(Serialize)]
    struct ListKey<'a> {
        filters: &'a TaskFilters,
        pagination: &'a Pagination,
    }

    /// Deterministic key for a listing; equal queries hash equally
    pub fn task_list(filters: &TaskFilters, pagination: &Pagination) -> String {
        let filters = filters.normalized();
        let canonical = serde_json::to_vec(&ListKey {
            filters: &filters,
            pagination,
        })
        .unwrap_or_default();
        format!("tasks:list:{}", hex::encode(Sha256::digest(&canonical)))
    }
}

/// TTLs applied by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub stats_ttl: Duration,
}

impl CacheSettings {
    pub fn new(default_ttl: Duration, stats_ttl: Duration) -> Self {
        Self {
            default_ttl,
            stats_ttl: stats_ttl.min(default_ttl),
        }
    }

    /// Listings are more volatile than single tasks
    pub fn list_ttl(&self) -> Duration {
        (self.default_ttl / 2).max(Duration::from_secs(1))
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(60))
    }
}

pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    cache: Arc<dyn Cache>,
    settings: CacheSettings,
}

impl TaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        cache: Arc<dyn Cache>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            settings,
        }
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    pub async fn create_task(&self, input: NewTask) -> Result<Task> {
        let input = input.validated()?;
        tracing::info!(title = %input.title, "Creating task");

        let task = self.repository.create(input).await?;

        self.cache_set(&keys::task(&task.id), &task, self.settings.default_ttl)
            .await;
        self.invalidate_listings().await;

        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let key = parse_task_id(id).map(|uuid| keys::task(&uuid));

        if let Some(key) = &key {
            if let Some(task) = self.cache_get::<Task>(key).await {
                tracing::debug!("Cache hit for task {}", id);
                return Ok(task);
            }
        }

        let task = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        if let Some(key) = &key {
            self.cache_set(key, &task, self.settings.default_ttl).await;
        }

        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        filters: &TaskFilters,
        pagination: &Pagination,
    ) -> Result<Page<Task>> {
        let key = keys::task_list(filters, pagination);

        if let Some(page) = self.cache_get::<Page<Task>>(&key).await {
            tracing::debug!("Cache hit for task list");
            return Ok(page);
        }

        let page = self.repository.find_all(filters, pagination).await?;
        self.cache_set(&key, &page, self.settings.list_ttl()).await;

        Ok(page)
    }

    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let patch = patch.validated()?;
        tracing::info!("Updating task {}", id);

        if !self.repository.exists(id).await? {
            return Err(Error::TaskNotFound(id.to_string()));
        }

        // Absent here means it was deleted after the existence check
        let task = self
            .repository
            .update(id, patch)
            .await?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        self.cache_set(&keys::task(&task.id), &task, self.settings.default_ttl)
            .await;
        self.invalidate_listings().await;

        Ok(task)
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        tracing::info!("Deleting task {}", id);

        if !self.repository.exists(id).await? {
            return Err(Error::TaskNotFound(id.to_string()));
        }

        if !self.repository.delete(id).await? {
            return Err(Error::TaskNotFound(id.to_string()));
        }

        if let Some(uuid) = parse_task_id(id) {
            self.cache_delete(&keys::task(&uuid)).await;
        }
        self.invalidate_listings().await;

        Ok(())
    }

    pub async fn statistics(&self) -> Result<TaskStatistics> {
        if let Some(stats) = self.cache_get::<TaskStatistics>(keys::STATS).await {
            return Ok(stats);
        }

        let stats = self.repository.statistics().await?;
        self.cache_set(keys::STATS, &stats, self.settings.stats_ttl).await;

        Ok(stats)
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache GET error for {}: {}", key, e);
                None
            }
        }
    }

    async fn cache_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.cache.set(key, raw, ttl).await {
            tracing::warn!("Cache SET error for {}: {}", key, e);
        }
    }

    async fn cache_delete(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!("Cache DELETE error for {}: {}", key, e);
        }
    }

    async fn invalidate_listings(&self) {
        match self.cache.delete_pattern(keys::INVALIDATE_PATTERN).await {
            Ok(removed) => tracing::debug!("Invalidated {} cached listings", removed),
            Err(e) => tracing::warn!(
                "Cache DELETE PATTERN error for {}: {}",
                keys::INVALIDATE_PATTERN,
                e
            ),
        }
    }
}
