//! Filter, pagination and result types for task listing

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::model::{ParseEnumError, Task, TaskPriority, TaskStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const SEARCH_MAX_CHARS: usize = 100;

/// Narrowing criteria for a task listing; every present field is ANDed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// Case-insensitive substring over title OR description
    pub search: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub due_after: Option<DateTime<Utc>>,
    /// Match any of these tags
    pub tags: Option<Vec<String>>,
}

impl TaskFilters {
    /// Canonical form: trimmed lowercase search, sorted unique tags,
    /// dates at stored (microsecond) precision, empties dropped
    pub fn normalized(&self) -> Self {
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let micros = |d: Option<DateTime<Utc>>| d.map(|d| d.trunc_subsecs(6));
        let tags = self.tags.as_ref().and_then(|tags| {
            let mut tags: Vec<String> = tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            tags.sort();
            tags.dedup();
            if tags.is_empty() {
                None
            } else {
                Some(tags)
            }
        });

        Self {
            status: self.status,
            priority: self.priority,
            search,
            due_date: micros(self.due_date),
            due_before: micros(self.due_before),
            due_after: micros(self.due_after),
            tags,
        }
    }

    /// Whether `task` satisfies every present criterion
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if !task.title.to_lowercase().contains(&needle)
                && !task.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(exact) = self.due_date {
            if task.due_date != Some(exact) {
                return false;
            }
        }
        if let Some(before) = self.due_before {
            if !task.due_date.is_some_and(|d| d <= before) {
                return false;
            }
        }
        if let Some(after) = self.due_after {
            if !task.due_date.is_some_and(|d| d >= after) {
                return false;
            }
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            if !task.tags.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Title,
    Status,
    Priority,
    DueDate,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Title => "title",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::DueDate => "dueDate",
        }
    }

    /// Ascending comparison of two tasks on this field; missing due dates sort first
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            Self::Title => a.title.cmp(&b.title),
            Self::Status => a.status.rank().cmp(&b.status.rank()),
            Self::Priority => a.priority.rank().cmp(&b.priority.rank()),
            Self::DueDate => a.due_date.cmp(&b.due_date),
        }
    }
}

impl Default for SortField {
    fn default() -> Self {
        Self::CreatedAt
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(Self::CreatedAt),
            "updatedAt" => Ok(Self::UpdatedAt),
            "title" => Ok(Self::Title),
            "status" => Ok(Self::Status),
            "priority" => Ok(Self::Priority),
            "dueDate" => Ok(Self::DueDate),
            other => Err(ParseEnumError::new("sort field", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Desc
    }
}

impl FromStr for SortOrder {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(ParseEnumError::new("sort order", other)),
        }
    }
}

/// Page selection and ordering for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort_by: SortField, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    /// Number of matching rows to skip
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Full ordering for in-process stores: sort field, direction, then id
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let primary = match self.sort_order {
            SortOrder::Asc => self.sort_by.compare(a, b),
            SortOrder::Desc => self.sort_by.compare(b, a),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageInfo {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        let total_pages = total.div_ceil(u64::from(limit.max(1)));
        Self {
            total,
            page,
            limit,
            total_pages,
            has_next_page: u64::from(page) < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// One page of results plus the arithmetic over the full match set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, pagination: &Pagination) -> Self {
        Self {
            data,
            pagination: PageInfo::new(total, pagination.page, pagination.limit),
        }
    }
}

/// Aggregate counts; enum values with no tasks are absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
}

impl TaskStatistics {
    pub fn status_count(&self, status: TaskStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn priority_count(&self, priority: TaskPriority) -> u64 {
        self.by_priority.get(priority.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{parse_due_date, timestamp_now, NewTask};

    fn task(title: &str, status: TaskStatus, priority: TaskPriority) -> Task {
        Task::from_new(
            NewTask::new(title).with_status(status).with_priority(priority),
            timestamp_now(),
        )
    }

    #[test]
    fn test_page_info_arithmetic() {
        let info = PageInfo::new(25, 3, 10);
        assert_eq!(info.total_pages, 3);
        assert!(!info.has_next_page);
        assert!(info.has_prev_page);

        let first = PageInfo::new(25, 1, 10);
        assert!(first.has_next_page);
        assert!(!first.has_prev_page);

        let empty = PageInfo::new(0, 1, 10);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn test_offset() {
        assert_eq!(Pagination::new(1, 10).offset(), 0);
        assert_eq!(Pagination::new(3, 25).offset(), 50);
    }

    #[test]
    fn test_pagination_new_clamps() {
        let pagination = Pagination::new(0, 500);
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_matches_is_conjunctive() {
        let filters = TaskFilters {
            status: Some(TaskStatus::Pending),
            priority: Some(TaskPriority::High),
            ..TaskFilters::default()
        };
        assert!(filters.matches(&task("a", TaskStatus::Pending, TaskPriority::High)));
        assert!(!filters.matches(&task("b", TaskStatus::Pending, TaskPriority::Low)));
        assert!(!filters.matches(&task("c", TaskStatus::Completed, TaskPriority::High)));
    }

    #[test]
    fn test_search_covers_title_or_description() {
        let mut t = task("Quarterly Report", TaskStatus::Pending, TaskPriority::Low);
        t.description = "Numbers for the BOARD".to_string();

        let by_title = TaskFilters {
            search: Some("report".to_string()),
            ..TaskFilters::default()
        };
        let by_description = TaskFilters {
            search: Some("board".to_string()),
            ..TaskFilters::default()
        };
        let neither = TaskFilters {
            search: Some("invoice".to_string()),
            ..TaskFilters::default()
        };
        assert!(by_title.matches(&t));
        assert!(by_description.matches(&t));
        assert!(!neither.matches(&t));
    }

    #[test]
    fn test_due_bounds_are_inclusive_and_skip_undated() {
        let mut t = task("dated", TaskStatus::Pending, TaskPriority::Low);
        t.due_date = parse_due_date("2024-05-10");
        let undated = task("undated", TaskStatus::Pending, TaskPriority::Low);

        let window = TaskFilters {
            due_after: parse_due_date("2024-05-10"),
            due_before: parse_due_date("2024-05-10"),
            ..TaskFilters::default()
        };
        assert!(window.matches(&t));
        assert!(!window.matches(&undated));
    }

    #[test]
    fn test_tags_match_any() {
        let mut t = task("tagged", TaskStatus::Pending, TaskPriority::Low);
        t.tags = vec!["home".to_string(), "errand".to_string()];

        let filters = TaskFilters {
            tags: Some(vec!["work".to_string(), "errand".to_string()]),
            ..TaskFilters::default()
        };
        assert!(filters.matches(&t));

        let other = TaskFilters {
            tags: Some(vec!["work".to_string()]),
            ..TaskFilters::default()
        };
        assert!(!other.matches(&t));
    }

    #[test]
    fn test_normalized_sorts_tags_and_drops_blank_search() {
        let filters = TaskFilters {
            search: Some("   ".to_string()),
            tags: Some(vec!["b".to_string(), " a ".to_string(), "b".to_string()]),
            ..TaskFilters::default()
        };
        let normalized = filters.normalized();
        assert!(normalized.search.is_none());
        assert_eq!(normalized.tags, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_normalized_lowercases_search_and_truncates_dates() {
        let filters = TaskFilters {
            search: Some(" Quarterly REPORT ".to_string()),
            due_before: parse_due_date("2030-01-01T00:00:00.1234567Z"),
            ..TaskFilters::default()
        };
        let normalized = filters.normalized();
        assert_eq!(normalized.search.as_deref(), Some("quarterly report"));
        assert_eq!(normalized.due_before, parse_due_date("2030-01-01T00:00:00.123456Z"));
    }

    #[test]
    fn test_priority_sort_uses_declared_order() {
        let low = task("low", TaskStatus::Pending, TaskPriority::Low);
        let urgent = task("urgent", TaskStatus::Pending, TaskPriority::Urgent);
        let pagination = Pagination::default().sorted(SortField::Priority, SortOrder::Desc);
        assert_eq!(pagination.compare(&urgent, &low), Ordering::Less);
    }

    #[test]
    fn test_sort_field_parse() {
        assert_eq!("dueDate".parse::<SortField>().unwrap(), SortField::DueDate);
        assert!("color".parse::<SortField>().is_err());
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
    }
}
