//! Health, readiness and index endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: &'static str,
    uptime_seconds: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct ServiceStatus {
    store: &'static str,
    cache: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    services: ServiceStatus,
    timestamp: DateTime<Utc>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config().environment.as_str(),
        uptime_seconds: state.uptime().as_secs(),
        timestamp: Utc::now(),
    })
}

/// Ready when the store answers; a missing or failing cache only degrades
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let store = match state.tasks().repository().health_check().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!("Store health check failed: {}", e);
            "disconnected"
        }
    };

    let cache = state.tasks().cache();
    let cache_status = if cache.backend() == "none" {
        "disabled"
    } else {
        match cache.ping().await {
            Ok(()) => "connected",
            Err(e) => {
                tracing::warn!("Cache ping failed: {}", e);
                "disconnected"
            }
        }
    };

    let ready = store == "connected";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not ready" },
            services: ServiceStatus {
                store,
                cache: cache_status,
            },
            timestamp: Utc::now(),
        }),
    )
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "Task Manager API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /health": "Health check",
            "GET /ready": "Readiness check",
            "GET /api/v1/tasks": "List tasks with filters",
            "POST /api/v1/tasks": "Create a task",
            "GET /api/v1/tasks/{id}": "Get task by ID",
            "PUT /api/v1/tasks/{id}": "Update task",
            "PATCH /api/v1/tasks/{id}": "Partial update",
            "DELETE /api/v1/tasks/{id}": "Delete task",
            "GET /api/v1/tasks/stats": "Get statistics"
        },
        "filters": {
            "status": ["pending", "in-progress", "completed", "cancelled"],
            "priority": ["low", "medium", "high", "urgent"],
            "search": "Search in title/description",
            "dueDate": "ISO 8601 date",
            "dueBefore": "ISO 8601 date",
            "dueAfter": "ISO 8601 date",
            "tags": "Comma-separated, matches any",
            "page": "Page number (default: 1)",
            "limit": "Items per page (1-100, default: 10)",
            "sortBy": "createdAt, updatedAt, title, status, priority, dueDate",
            "sortOrder": "asc, desc"
        }
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    use tm_core::cache::NoopCache;
    use tm_core::task::{CacheSettings, FileTaskStore, TaskService};

    use super::*;
    use crate::config::AppConfig;

    async fn build_state() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path().join("tasks.json"))
            .await
            .unwrap();
        let service = TaskService::new(
            Arc::new(store),
            Arc::new(NoopCache),
            CacheSettings::default(),
        );
        let config = AppConfig::from_lookup(|_| None).unwrap();
        (AppState::new(config, service), temp_dir)
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
        let response = crate::routes::router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _tmp) = build_state().await;
        let (status, body) = get_json(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "development");
        assert!(body["uptimeSeconds"].is_u64());
    }

    #[tokio::test]
    async fn ready_without_cache() {
        let (state, _tmp) = build_state().await;
        let (status, body) = get_json(state, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["services"]["store"], "connected");
        assert_eq!(body["services"]["cache"], "disabled");
    }

    #[tokio::test]
    async fn index_lists_endpoints() {
        let (state, _tmp) = build_state().await;
        let (status, body) = get_json(state, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Task Manager API");
        assert!(body["endpoints"]["GET /api/v1/tasks"].is_string());
    }

    #[tokio::test]
    async fn unknown_route_is_404_envelope() {
        let (state, _tmp) = build_state().await;
        let (status, body) = get_json(state, "/api/v2/tasks").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Endpoint GET /api/v2/tasks not found");
    }
}
