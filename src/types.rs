//! Core domain types for the task store.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by tasks and subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Done => "done",
        }
    }

    /// Parse a stored status value. Unknown values read as pending so rows
    /// written by older versions stay visible.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => Status::InProgress,
            "done" => Status::Done,
            _ => Status::Pending,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Pending
    }
}

/// Task category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Feature,
    Bug,
    Refactor,
    Research,
    Documentation,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Feature => "feature",
            TaskCategory::Bug => "bug",
            TaskCategory::Refactor => "refactor",
            TaskCategory::Research => "research",
            TaskCategory::Documentation => "documentation",
        }
    }

    /// Parse a stored category value; unrecognized values read as feature.
    pub fn parse(s: &str) -> Self {
        match s {
            "bug" => TaskCategory::Bug,
            "refactor" => TaskCategory::Refactor,
            "research" => TaskCategory::Research,
            "documentation" => TaskCategory::Documentation,
            _ => TaskCategory::Feature,
        }
    }
}

impl Default for TaskCategory {
    fn default() -> Self {
        TaskCategory::Feature
    }
}

/// Estimated implementation complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Epic,
}

impl TaskComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskComplexity::Trivial => "trivial",
            TaskComplexity::Simple => "simple",
            TaskComplexity::Moderate => "moderate",
            TaskComplexity::Complex => "complex",
            TaskComplexity::Epic => "epic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(TaskComplexity::Trivial),
            "simple" => Some(TaskComplexity::Simple),
            "moderate" => Some(TaskComplexity::Moderate),
            "complex" => Some(TaskComplexity::Complex),
            "epic" => Some(TaskComplexity::Epic),
            _ => None,
        }
    }
}

/// Who last touched a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Ai,
    Cli,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Ai => "ai",
            Actor::Cli => "cli",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Actor::User),
            "ai" => Some(Actor::Ai),
            "cli" => Some(Actor::Cli),
            _ => None,
        }
    }
}

/// Task priority as an integer. 1 = highest, 3 = lowest.
pub type Priority = i64;

pub const PRIORITY_HIGH: Priority = 1;
pub const PRIORITY_MEDIUM: Priority = 2;
pub const PRIORITY_LOW: Priority = 3;
pub const PRIORITY_DEFAULT: Priority = PRIORITY_MEDIUM;

/// Clamp a priority into the valid 1..=3 range.
pub fn clamp_priority(p: Priority) -> Priority {
    p.clamp(PRIORITY_HIGH, PRIORITY_LOW)
}

/// Assistant bookkeeping attached to every task.
///
/// Always present in the domain model; a NULL or malformed column decodes to
/// the default shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiMetadata {
    pub last_interaction: Option<String>,
    pub last_completed_action: Option<String>,
    pub session_ids: Vec<String>,
    pub tokens_used: i64,
    pub structuring_complete: bool,
}

impl Default for AiMetadata {
    fn default() -> Self {
        Self {
            last_interaction: None,
            last_completed_action: None,
            session_ids: Vec::new(),
            tokens_used: 0,
            structuring_complete: false,
        }
    }
}

impl AiMetadata {
    /// Shallow-merge a patch: only supplied fields replace stored values.
    pub fn apply(&mut self, patch: &AiMetadataPatch) {
        if let Some(ref v) = patch.last_interaction {
            self.last_interaction = Some(v.clone());
        }
        if let Some(ref v) = patch.last_completed_action {
            self.last_completed_action = Some(v.clone());
        }
        if let Some(ref v) = patch.session_ids {
            self.session_ids = v.clone();
        }
        if let Some(v) = patch.tokens_used {
            self.tokens_used = v;
        }
        if let Some(v) = patch.structuring_complete {
            self.structuring_complete = v;
        }
    }
}

/// Partial update for [`AiMetadata`]; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiMetadataPatch {
    pub last_interaction: Option<String>,
    pub last_completed_action: Option<String>,
    pub session_ids: Option<Vec<String>>,
    pub tokens_used: Option<i64>,
    pub structuring_complete: Option<bool>,
}

/// Structured context captured on a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub business_rules: Vec<String>,
    pub technical_notes: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
}

/// Partial update for [`TaskContext`]; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContextPatch {
    pub business_rules: Option<Vec<String>>,
    pub technical_notes: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
}

/// A task row without its subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub category: TaskCategory,
    pub status: Status,
    pub complexity: Option<TaskComplexity>,
    pub due_date: Option<String>,
    pub scheduled_date: Option<String>,
    pub context: TaskContext,
    pub ai_metadata: AiMetadata,
    pub started_at: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub modified_at: Option<String>,
    pub modified_by: Option<Actor>,
}

/// A task with its subtasks hydrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFull {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<Subtask>,
}

/// A subtask row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub status: Status,
    pub order: i64,
    pub description: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub technical_notes: Option<String>,
    pub prompt_context: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// A project row. `routes` and `terminal_config` are collaborator-owned
/// encoded blobs; the store round-trips them without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub routes: serde_json::Value,
    pub terminal_config: serde_json::Value,
    pub display_order: i64,
    pub color: Option<String>,
    pub created_at: String,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTaskInput {
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<TaskCategory>,
    pub status: Option<Status>,
    pub complexity: Option<TaskComplexity>,
    pub due_date: Option<String>,
    pub scheduled_date: Option<String>,
    pub context: Option<TaskContext>,
}

/// Serde adapter for two-level options on nullable columns: a missing field
/// deserializes to `None` (keep), an explicit null to `Some(None)` (clear).
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

/// Sparse task update; only supplied fields are written.
///
/// Nullable columns take a two-level option: `None` keeps the stored value,
/// `Some(None)` clears it, `Some(Some(v))` replaces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateTaskInput {
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<String>>,
    pub title: Option<String>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub category: Option<TaskCategory>,
    pub status: Option<Status>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Option<TaskComplexity>>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<String>>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<Option<String>>,
    pub context: Option<TaskContextPatch>,
    pub ai_metadata: Option<AiMetadataPatch>,
    pub modified_by: Option<Actor>,
}

/// Input for creating a subtask.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSubtaskInput {
    pub task_id: String,
    pub title: String,
    pub status: Option<Status>,
    pub order: Option<i64>,
    pub description: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub technical_notes: Option<String>,
    pub prompt_context: Option<String>,
}

/// Sparse subtask update; only supplied fields are written. Nullable text
/// fields follow the same two-level option convention as [`UpdateTaskInput`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSubtaskInput {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub order: Option<i64>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub technical_notes: Option<Option<String>>,
    #[serde(deserialize_with = "double_option::deserialize", skip_serializing_if = "Option::is_none")]
    pub prompt_context: Option<Option<String>>,
}

/// Status filter accepting a single value or a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusFilter {
    One(Status),
    Many(Vec<Status>),
}

impl StatusFilter {
    pub fn values(&self) -> Vec<Status> {
        match self {
            StatusFilter::One(s) => vec![*s],
            StatusFilter::Many(v) => v.clone(),
        }
    }
}

/// Sort key for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Priority,
    CreatedAt,
    Title,
    ProgressState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filters and paging for task listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskListFilters {
    pub project_id: Option<String>,
    pub status: Option<StatusFilter>,
    pub category: Option<TaskCategory>,
    pub priority: Option<Priority>,
    /// Case-insensitive substring match against title and description.
    pub search: Option<String>,
    /// Drop done tasks from the result regardless of the status filter.
    pub exclude_done: bool,
    pub scheduled_date: Option<String>,
    pub due_date: Option<String>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    /// 1-based page number.
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub const PER_PAGE_DEFAULT: i64 = 20;
pub const PER_PAGE_MAX: i64 = 100;

/// One page of results plus paging metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_reads_as_pending() {
        assert_eq!(Status::parse("structuring"), Status::Pending);
        assert_eq!(Status::parse(""), Status::Pending);
        assert_eq!(Status::parse("done"), Status::Done);
    }

    #[test]
    fn priority_clamps_to_range() {
        assert_eq!(clamp_priority(0), PRIORITY_HIGH);
        assert_eq!(clamp_priority(2), PRIORITY_MEDIUM);
        assert_eq!(clamp_priority(99), PRIORITY_LOW);
    }

    #[test]
    fn update_input_tells_absent_from_null() {
        let absent: UpdateTaskInput = serde_json::from_str(r#"{}"#).unwrap();
        assert!(absent.due_date.is_none());

        let cleared: UpdateTaskInput =
            serde_json::from_str(r#"{"due_date": null}"#).unwrap();
        assert_eq!(cleared.due_date, Some(None));

        let set: UpdateTaskInput =
            serde_json::from_str(r#"{"due_date": "2026-09-15"}"#).unwrap();
        assert_eq!(set.due_date, Some(Some("2026-09-15".to_string())));
    }

    #[test]
    fn ai_metadata_patch_merges_shallowly() {
        let mut meta = AiMetadata::default();
        meta.session_ids = vec!["a".into()];
        meta.apply(&AiMetadataPatch {
            tokens_used: Some(42),
            ..Default::default()
        });
        assert_eq!(meta.tokens_used, 42);
        assert_eq!(meta.session_ids, vec!["a".to_string()]);
        assert!(!meta.structuring_complete);
    }
}
