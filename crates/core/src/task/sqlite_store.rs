//! SQLite-backed task storage
//!
//! Filtering, ordering, counting and paging are all pushed down into SQL.
//! The connection sits behind a mutex and every call runs on the blocking
//! thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use super::model::{timestamp_now, NewTask, Task, TaskPatch};
use super::query::{Page, Pagination, SortField, SortOrder, TaskFilters, TaskStatistics};
use super::repository::{parse_task_id, TaskRepository};
use crate::{Error, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id          TEXT PRIMARY KEY,
        title       TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status      TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'in-progress', 'completed', 'cancelled')),
        priority    TEXT NOT NULL DEFAULT 'medium'
                    CHECK(priority IN ('low', 'medium', 'high', 'urgent')),
        due_date    TEXT,
        tags        TEXT NOT NULL DEFAULT '[]',
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
    CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);
    CREATE INDEX IF NOT EXISTS idx_tasks_due_date ON tasks(due_date);
";

const COLUMNS: &str =
    "id, title, description, status, priority, due_date, tags, created_at, updated_at";

/// Task store on an embedded SQLite database
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file and initialize the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!("Opened task database at {:?}", path);
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly useful for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Built-in LIKE and lower() only fold ASCII
        conn.create_scalar_function(
            "ulower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Storage("database connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("database task failed: {}", e)))?
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let due_date: Option<String> = row.get(5)?;
    let tags: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Task {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        priority: priority.parse().map_err(|e| conversion_error(4, e))?,
        due_date: due_date.as_deref().map(|raw| parse_timestamp(5, raw)).transpose()?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(6, e))?,
        created_at: parse_timestamp(7, &created_at)?,
        updated_at: parse_timestamp(8, &updated_at)?,
    })
}

fn fetch_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_task).optional()?)
}

fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    let sql = format!(
        "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        COLUMNS
    );
    conn.execute(
        &sql,
        params![
            task.id.to_string(),
            task.title,
            task.description,
            task.status.as_str(),
            task.priority.as_str(),
            task.due_date.as_ref().map(format_timestamp),
            serde_json::to_string(&task.tags)?,
            format_timestamp(&task.created_at),
            format_timestamp(&task.updated_at),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("Task with ID {} already exists", task.id))
        }
        other => Error::Database(other),
    })?;
    Ok(())
}

/// WHERE clause plus its positional parameters
#[derive(Debug, Default)]
struct WhereClause {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    fn from_filters(filters: &TaskFilters) -> Self {
        let filters = filters.normalized();
        let mut clause = Self::default();

        if let Some(status) = filters.status {
            clause.push("status = ?", vec![Value::Text(status.as_str().to_string())]);
        }
        if let Some(priority) = filters.priority {
            clause.push("priority = ?", vec![Value::Text(priority.as_str().to_string())]);
        }
        if let Some(search) = &filters.search {
            let needle = search.to_lowercase();
            clause.push(
                "(instr(ulower(title), ?) > 0 OR instr(ulower(description), ?) > 0)",
                vec![Value::Text(needle.clone()), Value::Text(needle)],
            );
        }
        if let Some(due) = &filters.due_date {
            clause.push("due_date = ?", vec![Value::Text(format_timestamp(due))]);
        }
        if let Some(before) = &filters.due_before {
            clause.push("due_date <= ?", vec![Value::Text(format_timestamp(before))]);
        }
        if let Some(after) = &filters.due_after {
            clause.push("due_date >= ?", vec![Value::Text(format_timestamp(after))]);
        }
        if let Some(tags) = &filters.tags {
            let placeholders = vec!["?"; tags.len()].join(", ");
            clause.push(
                &format!(
                    "EXISTS (SELECT 1 FROM json_each(tasks.tags) WHERE json_each.value IN ({}))",
                    placeholders
                ),
                tags.iter().cloned().map(Value::Text).collect(),
            );
        }

        clause
    }

    fn push(&mut self, condition: &str, params: Vec<Value>) {
        self.conditions.push(condition.to_string());
        self.params.extend(params);
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn order_by(pagination: &Pagination) -> String {
    let expr = match pagination.sort_by {
        SortField::CreatedAt => "created_at",
        SortField::UpdatedAt => "updated_at",
        SortField::Title => "title",
        SortField::Status => {
            "CASE status WHEN 'pending' THEN 0 WHEN 'in-progress' THEN 1 \
             WHEN 'completed' THEN 2 ELSE 3 END"
        }
        SortField::Priority => {
            "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 \
             WHEN 'high' THEN 2 ELSE 3 END"
        }
        SortField::DueDate => "due_date",
    };
    let direction = match pagination.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!("ORDER BY {} {}, id ASC", expr, direction)
}

fn count_by(conn: &Connection, column: &str) -> Result<Vec<(String, u64)>> {
    let sql = format!("SELECT {0}, COUNT(*) FROM tasks GROUP BY {0}", column);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((key, count.max(0) as u64))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[async_trait]
impl TaskRepository for SqliteTaskStore {
    async fn create(&self, input: NewTask) -> Result<Task> {
        let task = Task::from_new(input, timestamp_now());
        let task = self
            .call(move |conn| {
                insert_task(conn, &task)?;
                Ok(task)
            })
            .await?;
        tracing::info!("Task created: {}", task.id);
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let Some(id) = parse_task_id(id) else {
            return Ok(None);
        };
        self.call(move |conn| fetch_task(conn, &id.to_string())).await
    }

    async fn find_all(&self, filters: &TaskFilters, pagination: &Pagination) -> Result<Page<Task>> {
        let clause = WhereClause::from_filters(filters);
        let pagination = *pagination;

        self.call(move |conn| {
            let where_sql = clause.sql();

            let count_sql = format!("SELECT COUNT(*) FROM tasks {}", where_sql);
            let total: i64 =
                conn.query_row(&count_sql, params_from_iter(clause.params.iter()), |row| {
                    row.get(0)
                })?;

            let page_sql = format!(
                "SELECT {} FROM tasks {} {} LIMIT ? OFFSET ?",
                COLUMNS,
                where_sql,
                order_by(&pagination)
            );
            let mut page_params = clause.params.clone();
            page_params.push(Value::Integer(i64::from(pagination.limit)));
            page_params.push(Value::Integer(
                i64::try_from(pagination.offset()).unwrap_or(i64::MAX),
            ));

            let mut stmt = conn.prepare(&page_sql)?;
            let data = stmt
                .query_map(params_from_iter(page_params.iter()), row_to_task)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page::new(data, total.max(0) as u64, &pagination))
        })
        .await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>> {
        let Some(id) = parse_task_id(id) else {
            return Ok(None);
        };
        let updated = self
            .call(move |conn| {
                let id = id.to_string();
                let Some(mut task) = fetch_task(conn, &id)? else {
                    return Ok(None);
                };
                task.apply(patch, timestamp_now());
                conn.execute(
                    "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                        due_date = ?5, tags = ?6, updated_at = ?7
                     WHERE id = ?8",
                    params![
                        task.title,
                        task.description,
                        task.status.as_str(),
                        task.priority.as_str(),
                        task.due_date.as_ref().map(format_timestamp),
                        serde_json::to_string(&task.tags)?,
                        format_timestamp(&task.updated_at),
                        id,
                    ],
                )?;
                Ok(Some(task))
            })
            .await?;
        if updated.is_some() {
            tracing::info!("Task updated: {}", id);
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(id) = parse_task_id(id) else {
            return Ok(false);
        };
        let removed = self
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?)
            })
            .await?;
        if removed > 0 {
            tracing::info!("Task deleted: {}", id);
        }
        Ok(removed > 0)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let Some(id) = parse_task_id(id) else {
            return Ok(false);
        };
        self.call(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM tasks WHERE id = ?1 LIMIT 1",
                    params![id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn statistics(&self) -> Result<TaskStatistics> {
        self.call(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(TaskStatistics {
                total: total.max(0) as u64,
                by_status: count_by(conn, "status")?.into_iter().collect(),
                by_priority: count_by(conn, "priority")?.into_iter().collect(),
            })
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}
