//! Application state

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tm_core::task::TaskService;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    tasks: TaskService,
    rate_limiter: RateLimiter,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, tasks: TaskService) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                tasks,
                rate_limiter,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get reference to the task service
    pub fn tasks(&self) -> &TaskService {
        &self.inner.tasks
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Convert a core error into a response error for this deployment
    pub fn reject(&self, err: tm_core::Error) -> ApiError {
        ApiError::from_core(err, self.inner.config.exposes_internal_errors())
    }
}
