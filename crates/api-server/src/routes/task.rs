//! Task API endpoints
//!
//! RESTful API for task CRUD operations, listing and statistics.

use std::fmt::Display;
use std::str::FromStr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use tm_core::task::{
    parse_due_date, NewTask, Pagination, SortField, SortOrder, TaskFilters, TaskPatch,
    TaskPriority, TaskStatus, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, SEARCH_MAX_CHARS,
};
use tm_core::FieldError;

use crate::error::ApiError;
use crate::response;
use crate::state::AppState;

// ============================================================================
// Request types
// ============================================================================

/// Raw listing query; every value is validated in [`ListTasksQuery::parse`]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub due_date: Option<String>,
    pub due_before: Option<String>,
    pub due_after: Option<String>,
    /// Comma-separated
    pub tags: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListTasksQuery {
    /// Validate every parameter, reporting all failures together
    pub fn parse(self) -> Result<(TaskFilters, Pagination), Vec<FieldError>> {
        let mut errors = Vec::new();

        let status = parse_enum::<TaskStatus>(
            "status",
            self.status,
            &format!("Status must be one of: {}", join(TaskStatus::ALL)),
            &mut errors,
        );
        let priority = parse_enum::<TaskPriority>(
            "priority",
            self.priority,
            &format!("Priority must be one of: {}", join(TaskPriority::ALL)),
            &mut errors,
        );

        let search = non_blank(self.search).map(|s| s.trim().to_string());
        if let Some(s) = &search {
            if s.chars().count() > SEARCH_MAX_CHARS {
                errors.push(
                    FieldError::new("search", format!("Search max {} characters", SEARCH_MAX_CHARS))
                        .with_value(s.clone()),
                );
            }
        }

        let due_date = parse_date("dueDate", self.due_date, &mut errors);
        let due_before = parse_date("dueBefore", self.due_before, &mut errors);
        let due_after = parse_date("dueAfter", self.due_after, &mut errors);

        let tags = non_blank(self.tags)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|tags| !tags.is_empty());

        let page = match non_blank(self.page) {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(page) if page >= 1 => page,
                _ => {
                    errors.push(FieldError::new("page", "Page must be >= 1").with_value(raw));
                    1
                }
            },
            None => 1,
        };
        let limit = match non_blank(self.limit) {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => limit,
                _ => {
                    errors.push(
                        FieldError::new("limit", format!("Limit must be 1-{}", MAX_PAGE_SIZE))
                            .with_value(raw),
                    );
                    DEFAULT_PAGE_SIZE
                }
            },
            None => DEFAULT_PAGE_SIZE,
        };
        let sort_by = parse_enum::<SortField>("sortBy", self.sort_by, "Invalid sortBy", &mut errors)
            .unwrap_or_default();
        let sort_order = parse_enum::<SortOrder>(
            "sortOrder",
            self.sort_order,
            "sortOrder must be asc or desc",
            &mut errors,
        )
        .unwrap_or_default();

        if !errors.is_empty() {
            return Err(errors);
        }

        let filters = TaskFilters {
            status,
            priority,
            search,
            due_date,
            due_before,
            due_after,
            tags,
        };
        Ok((filters, Pagination::new(page, limit).sorted(sort_by, sort_order)))
    }
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.filter(|v| !v.trim().is_empty())
}

fn join<T: Display>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_enum<T: FromStr>(
    field: &str,
    raw: Option<String>,
    message: &str,
    errors: &mut Vec<FieldError>,
) -> Option<T> {
    let raw = non_blank(raw)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(FieldError::new(field, message).with_value(raw));
            None
        }
    }
}

fn parse_date(
    field: &str,
    raw: Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = non_blank(raw)?;
    match parse_due_date(&raw) {
        Some(date) => Some(date),
        None => {
            errors.push(FieldError::new(field, format!("{} must be ISO 8601", field)).with_value(raw));
            None
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/tasks - List tasks with filters and pagination
async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (filters, pagination) = query.parse().map_err(ApiError::Validation)?;
    tracing::debug!(?filters, ?pagination, "Listing tasks");

    let page = state
        .tasks()
        .list_tasks(&filters, &pagination)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::ok(page, "Tasks retrieved successfully"))
}

/// POST /api/v1/tasks - Create a new task
async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(input) = payload?;
    let task = state
        .tasks()
        .create_task(input)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::created(task, "Task created successfully"))
}

/// GET /api/v1/tasks/stats - Aggregate counts
async fn task_statistics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stats = state
        .tasks()
        .statistics()
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::ok(stats, "Statistics retrieved successfully"))
}

/// GET /api/v1/tasks/{id} - Get a single task
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let task = state
        .tasks()
        .get_task(&id)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::ok(task, "Task retrieved successfully"))
}

/// PUT|PATCH /api/v1/tasks/{id} - Partially update a task
async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(patch) = payload?;
    let task = state
        .tasks()
        .update_task(&id, patch)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::ok(task, "Task updated successfully"))
}

/// DELETE /api/v1/tasks/{id} - Delete a task
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .tasks()
        .delete_task(&id)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(response::deleted("Task deleted successfully"))
}

// ============================================================================
// Router
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/stats", get(task_statistics))
        .route(
            "/tasks/{id}",
            get(get_task)
                .put(update_task)
                .patch(update_task)
                .delete(delete_task),
        )
}
