//! Task CRUD and the paginated listing.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::subtasks::{list_subtasks_internal, parse_subtask_row, SUBTASK_COLUMNS};
use super::{decode_or, new_id, now_iso, Database};
use crate::error::{StoreError, StoreResult};
use crate::progress::progress_state_for;
use crate::types::{
    clamp_priority, Actor, AiMetadata, CreateTaskInput, PaginatedResult, SortBy, SortOrder,
    Status, Subtask, Task, TaskCategory, TaskComplexity, TaskContext, TaskFull, TaskListFilters,
    UpdateTaskInput, PER_PAGE_DEFAULT, PER_PAGE_MAX, PRIORITY_DEFAULT,
};

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let priority: Option<i64> = row.get("priority")?;
    let category: Option<String> = row.get("category")?;
    let status: Option<String> = row.get("status")?;
    let complexity: Option<String> = row.get("complexity")?;
    let modified_by: Option<String> = row.get("modified_by")?;

    let business_rules_json: Option<String> = row.get("business_rules")?;
    let acceptance_json: Option<String> = row.get("acceptance_criteria")?;
    let ai_metadata_json: Option<String> = row.get("ai_metadata")?;

    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: priority.unwrap_or(PRIORITY_DEFAULT),
        category: category.as_deref().map(TaskCategory::parse).unwrap_or_default(),
        status: status.as_deref().map(Status::parse).unwrap_or_default(),
        complexity: complexity.as_deref().and_then(TaskComplexity::parse),
        due_date: row.get("due_date")?,
        scheduled_date: row.get("scheduled_date")?,
        context: TaskContext {
            business_rules: decode_or(business_rules_json, Vec::new()),
            technical_notes: row.get("technical_notes")?,
            acceptance_criteria: decode_or(acceptance_json, None),
        },
        ai_metadata: decode_or(ai_metadata_json, AiMetadata::default()),
        started_at: row.get("started_at")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
        modified_at: row.get("modified_at")?,
        modified_by: modified_by.as_deref().and_then(Actor::parse),
    })
}

/// Internal helper to get a task using an existing connection (avoids
/// re-entrant locking).
fn get_task_internal(conn: &Connection, id: &str) -> StoreResult<Option<Task>> {
    let task = conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], parse_task_row)
        .optional()?;
    Ok(task)
}

fn get_task_full_internal(conn: &Connection, id: &str) -> StoreResult<Option<TaskFull>> {
    let Some(task) = get_task_internal(conn, id)? else {
        return Ok(None);
    };
    let subtasks = list_subtasks_internal(conn, id)?;
    Ok(Some(TaskFull { task, subtasks }))
}

/// Build the WHERE fragment and bound params shared by the count, aggregate,
/// and page queries. Always starts with `WHERE 1=1` so callers can append.
fn build_task_filters(filters: &TaskListFilters) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut where_sql = String::from(" WHERE 1=1");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref project_id) = filters.project_id {
        where_sql.push_str(&format!(" AND t.project_id = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(project_id.clone()));
    }

    if let Some(ref status) = filters.status {
        let values = status.values();
        if !values.is_empty() {
            let mut placeholders = Vec::with_capacity(values.len());
            for value in values {
                params_vec.push(Box::new(value.as_str()));
                placeholders.push(format!("?{}", params_vec.len()));
            }
            where_sql.push_str(&format!(" AND t.status IN ({})", placeholders.join(", ")));
        }
    }

    if let Some(category) = filters.category {
        where_sql.push_str(&format!(" AND t.category = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(category.as_str()));
    }

    if let Some(priority) = filters.priority {
        where_sql.push_str(&format!(" AND t.priority = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(priority));
    }

    if let Some(ref search) = filters.search {
        if !search.is_empty() {
            let idx = params_vec.len() + 1;
            where_sql.push_str(&format!(
                " AND (t.title LIKE '%' || ?{idx} || '%' OR t.description LIKE '%' || ?{idx} || '%')"
            ));
            params_vec.push(Box::new(search.clone()));
        }
    }

    if filters.exclude_done {
        where_sql.push_str(" AND t.status != 'done'");
    }

    if let Some(ref scheduled) = filters.scheduled_date {
        where_sql.push_str(&format!(" AND t.scheduled_date = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(scheduled.clone()));
    }

    if let Some(ref due) = filters.due_date {
        where_sql.push_str(&format!(" AND t.due_date = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(due.clone()));
    }

    (where_sql, params_vec)
}

/// Storage-level ORDER BY. For the progress sort this is only a coarse
/// three-bucket pass (done / in_progress / rest); the exact rank needs
/// subtask counts and is applied in memory after the page is fetched.
fn coarse_order_clause(sort_by: SortBy, sort_order: SortOrder) -> &'static str {
    match (sort_by, sort_order) {
        (SortBy::Priority, SortOrder::Asc) => " ORDER BY t.priority ASC, t.created_at DESC",
        (SortBy::Priority, SortOrder::Desc) => " ORDER BY t.priority DESC, t.created_at DESC",
        (SortBy::CreatedAt, SortOrder::Asc) => " ORDER BY t.created_at ASC",
        (SortBy::CreatedAt, SortOrder::Desc) => " ORDER BY t.created_at DESC",
        (SortBy::Title, SortOrder::Asc) => " ORDER BY t.title COLLATE NOCASE ASC",
        (SortBy::Title, SortOrder::Desc) => " ORDER BY t.title COLLATE NOCASE DESC",
        (SortBy::ProgressState, SortOrder::Asc) => {
            " ORDER BY CASE t.status WHEN 'done' THEN 2 WHEN 'in_progress' THEN 1 ELSE 0 END ASC,
                       t.priority ASC, t.created_at DESC"
        }
        (SortBy::ProgressState, SortOrder::Desc) => {
            " ORDER BY CASE t.status WHEN 'done' THEN 2 WHEN 'in_progress' THEN 1 ELSE 0 END DESC,
                       t.priority DESC, t.created_at DESC"
        }
    }
}

impl Database {
    /// Create a task with defaults applied and return the hydrated aggregate.
    pub fn create_task(&self, input: CreateTaskInput) -> StoreResult<TaskFull> {
        let id = new_id();
        let now = now_iso();
        let priority = clamp_priority(input.priority.unwrap_or(PRIORITY_DEFAULT));
        let category = input.category.unwrap_or_default();
        let status = input.status.unwrap_or_default();
        let context = input.context.unwrap_or_default();

        let business_rules_json = serde_json::to_string(&context.business_rules)?;
        let acceptance_json = context
            .acceptance_criteria
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ai_metadata_json = serde_json::to_string(&AiMetadata::default())?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, project_id, title, description, priority, category,
                     status, complexity, due_date, scheduled_date, business_rules,
                     technical_notes, acceptance_criteria, ai_metadata, created_at,
                     modified_at, modified_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    id,
                    input.project_id,
                    input.title,
                    input.description,
                    priority,
                    category.as_str(),
                    status.as_str(),
                    input.complexity.map(|c| c.as_str()),
                    input.due_date,
                    input.scheduled_date,
                    business_rules_json,
                    context.technical_notes,
                    acceptance_json,
                    ai_metadata_json,
                    now,
                    now,
                    Actor::User.as_str(),
                ],
            )?;

            get_task_full_internal(conn, &id)?
                .ok_or_else(|| StoreError::internal("task row missing after insert"))
        })
    }

    pub fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, id))
    }

    pub fn get_task_full(&self, id: &str) -> StoreResult<Option<TaskFull>> {
        self.with_conn(|conn| get_task_full_internal(conn, id))
    }

    /// Apply a sparse update. Only supplied fields are written; two-level
    /// options on the nullable columns write NULL when the inner value is
    /// absent, and the ai_metadata patch merges into the stored blob.
    /// Returns None when no such task exists.
    pub fn update_task(
        &self,
        id: &str,
        input: UpdateTaskInput,
    ) -> StoreResult<Option<TaskFull>> {
        self.with_conn(|conn| {
            let Some(existing) = get_task_internal(conn, id)? else {
                return Ok(None);
            };

            let now = now_iso();
            let mut sets: Vec<String> = Vec::new();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref project_id) = input.project_id {
                sets.push(format!("project_id = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(project_id.clone()));
            }
            if let Some(ref title) = input.title {
                sets.push(format!("title = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(title.clone()));
            }
            if let Some(ref description) = input.description {
                sets.push(format!("description = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(description.clone()));
            }
            if let Some(priority) = input.priority {
                sets.push(format!("priority = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(clamp_priority(priority)));
            }
            if let Some(category) = input.category {
                sets.push(format!("category = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(category.as_str()));
            }
            if let Some(status) = input.status {
                sets.push(format!("status = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(status.as_str()));
                if status == Status::Done {
                    sets.push(format!("completed_at = ?{}", params_vec.len() + 1));
                    params_vec.push(Box::new(now.clone()));
                }
            }
            if let Some(complexity) = input.complexity {
                sets.push(format!("complexity = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(complexity.map(|c| c.as_str())));
            }
            if let Some(ref due) = input.due_date {
                sets.push(format!("due_date = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(due.clone()));
            }
            if let Some(ref scheduled) = input.scheduled_date {
                sets.push(format!("scheduled_date = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(scheduled.clone()));
            }

            if let Some(ref ctx) = input.context {
                if let Some(ref rules) = ctx.business_rules {
                    sets.push(format!("business_rules = ?{}", params_vec.len() + 1));
                    params_vec.push(Box::new(serde_json::to_string(rules)?));
                }
                if let Some(ref notes) = ctx.technical_notes {
                    sets.push(format!("technical_notes = ?{}", params_vec.len() + 1));
                    params_vec.push(Box::new(notes.clone()));
                }
                if let Some(ref criteria) = ctx.acceptance_criteria {
                    sets.push(format!("acceptance_criteria = ?{}", params_vec.len() + 1));
                    params_vec.push(Box::new(serde_json::to_string(criteria)?));
                }
            }

            // Read-merge-write: the patch only touches the fields it names.
            if let Some(ref patch) = input.ai_metadata {
                let mut meta = existing.ai_metadata.clone();
                meta.apply(patch);
                sets.push(format!("ai_metadata = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(serde_json::to_string(&meta)?));
            }

            sets.push(format!("modified_at = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(now));
            sets.push(format!("modified_by = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(input.modified_by.unwrap_or(Actor::User).as_str()));

            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ?{}",
                sets.join(", "),
                params_vec.len() + 1
            );
            params_vec.push(Box::new(id.to_string()));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            conn.execute(&sql, params_refs.as_slice())?;

            get_task_full_internal(conn, id)
        })
    }

    /// Set a task's status. Entering done stamps completed_at; the first
    /// transition into in_progress stamps started_at.
    pub fn update_task_status(
        &self,
        id: &str,
        status: Status,
        actor: Actor,
    ) -> StoreResult<Option<TaskFull>> {
        self.with_conn(|conn| {
            let existing: Option<Option<String>> = conn
                .query_row(
                    "SELECT started_at FROM tasks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(started_at) = existing else {
                return Ok(None);
            };

            let now = now_iso();
            let mut sets = vec![
                "status = ?1".to_string(),
                "modified_at = ?2".to_string(),
                "modified_by = ?3".to_string(),
            ];
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(status.as_str()),
                Box::new(now.clone()),
                Box::new(actor.as_str()),
            ];

            if status == Status::Done {
                sets.push(format!("completed_at = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(now.clone()));
            }
            if status == Status::InProgress && started_at.is_none() {
                sets.push(format!("started_at = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(now));
            }

            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ?{}",
                sets.join(", "),
                params_vec.len() + 1
            );
            params_vec.push(Box::new(id.to_string()));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            conn.execute(&sql, params_refs.as_slice())?;

            get_task_full_internal(conn, id)
        })
    }

    /// Delete a task and its subtasks. Returns false when no such task
    /// exists.
    pub fn delete_task(&self, id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM subtasks WHERE task_id = ?1", params![id])?;
            let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }

    /// Paginated listing of hydrated tasks.
    ///
    /// The progress sort runs in two phases. Storage orders by the coarse
    /// status bucket and applies LIMIT/OFFSET; the fetched page is then
    /// re-sorted by the exact (progress rank, priority) key using subtask
    /// counts aggregated over the whole filtered set. Tasks whose exact rank
    /// differs from their bucket can land on the wrong page; within a page
    /// the order is exact.
    pub fn find_all_full_paginated(
        &self,
        filters: &TaskListFilters,
    ) -> StoreResult<PaginatedResult<TaskFull>> {
        let page = filters.page.unwrap_or(1).max(1);
        let per_page = filters
            .per_page
            .unwrap_or(PER_PAGE_DEFAULT)
            .clamp(1, PER_PAGE_MAX);
        let sort_by = filters.sort_by.unwrap_or(SortBy::ProgressState);
        let sort_order = filters.sort_order.unwrap_or(SortOrder::Asc);

        self.with_conn(|conn| {
            let (where_sql, params_vec) = build_task_filters(filters);
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let count_sql = format!("SELECT COUNT(*) FROM tasks t{where_sql}");
            let total: i64 = conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;

            if total == 0 {
                return Ok(PaginatedResult {
                    items: Vec::new(),
                    total: 0,
                    page,
                    per_page,
                    total_pages: 0,
                });
            }

            // Subtask completion counts for every matching task, one query.
            let counts_sql = format!(
                "SELECT s.task_id, COUNT(*),
                        SUM(CASE WHEN s.status = 'done' THEN 1 ELSE 0 END)
                 FROM subtasks s
                 WHERE s.task_id IN (SELECT t.id FROM tasks t{where_sql})
                 GROUP BY s.task_id"
            );
            let mut subtask_counts: HashMap<String, (i64, i64)> = HashMap::new();
            let mut stmt = conn.prepare(&counts_sql)?;
            let mut rows = stmt.query(params_refs.as_slice())?;
            while let Some(row) = rows.next()? {
                let task_id: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let done: i64 = row.get(2)?;
                subtask_counts.insert(task_id, (count, done));
            }

            let order_clause = coarse_order_clause(sort_by, sort_order);
            let offset = (page - 1) * per_page;
            let sql = format!(
                "SELECT t.* FROM tasks t{where_sql}{order_clause} LIMIT {per_page} OFFSET {offset}"
            );

            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // Hydrate subtasks for the page only.
            let mut by_task: HashMap<String, Vec<Subtask>> = HashMap::new();
            if !tasks.is_empty() {
                let placeholders: Vec<String> =
                    (1..=tasks.len()).map(|i| format!("?{i}")).collect();
                let hydrate_sql = format!(
                    "SELECT {SUBTASK_COLUMNS} FROM subtasks
                     WHERE task_id IN ({})
                     ORDER BY task_id, \"order\"",
                    placeholders.join(", ")
                );
                let id_params: Vec<&dyn rusqlite::ToSql> = tasks
                    .iter()
                    .map(|t| &t.id as &dyn rusqlite::ToSql)
                    .collect();
                let mut stmt = conn.prepare(&hydrate_sql)?;
                let subtasks = stmt
                    .query_map(id_params.as_slice(), parse_subtask_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for subtask in subtasks {
                    by_task.entry(subtask.task_id.clone()).or_default().push(subtask);
                }
            }

            let mut items: Vec<TaskFull> = tasks
                .into_iter()
                .map(|task| {
                    let subtasks = by_task.remove(&task.id).unwrap_or_default();
                    TaskFull { task, subtasks }
                })
                .collect();

            // Exact re-sort within the page; other sort keys are already
            // exact at the storage level.
            if sort_by == SortBy::ProgressState {
                items.sort_by_key(|item| {
                    let (count, done) = subtask_counts
                        .get(&item.task.id)
                        .copied()
                        .unwrap_or((0, 0));
                    let has_description = item
                        .task
                        .description
                        .as_deref()
                        .is_some_and(|d| !d.trim().is_empty());
                    let state = progress_state_for(
                        item.task.status,
                        has_description,
                        count as usize,
                        done as usize,
                    );
                    // Descending flips the rank only; priority still breaks
                    // ties ascending (1 = highest).
                    let rank = state.rank() as i8;
                    let rank_key = match sort_order {
                        SortOrder::Asc => rank,
                        SortOrder::Desc => -rank,
                    };
                    (rank_key, item.task.priority)
                });
            }

            let total_pages = ((total as f64) / (per_page as f64)).ceil() as i64;

            Ok(PaginatedResult {
                items,
                total,
                page,
                per_page,
                total_pages,
            })
        })
    }

    /// Flat, unpaginated listing with the same filters as the paginated
    /// variant. Progress sorting is not offered here; callers that need it
    /// use the paginated listing.
    pub fn list_tasks(&self, filters: &TaskListFilters) -> StoreResult<Vec<Task>> {
        let sort_by = match filters.sort_by {
            Some(SortBy::ProgressState) | None => SortBy::CreatedAt,
            Some(other) => other,
        };
        let sort_order = filters.sort_order.unwrap_or(SortOrder::Desc);

        self.with_conn(|conn| {
            let (where_sql, params_vec) = build_task_filters(filters);
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let sql = format!(
                "SELECT t.* FROM tasks t{where_sql}{}",
                coarse_order_clause(sort_by, sort_order)
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Tasks scheduled on an exact date (YYYY-MM-DD).
    pub fn list_for_date(&self, date: &str) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE scheduled_date = ?1 ORDER BY priority, created_at",
            )?;
            let tasks = stmt
                .query_map(params![date], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Tasks scheduled anywhere within a calendar month.
    pub fn list_for_month(&self, year: i32, month: u32) -> StoreResult<Vec<Task>> {
        let prefix = format!("{year:04}-{month:02}");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE scheduled_date LIKE ?1 || '%'
                 ORDER BY scheduled_date, priority",
            )?;
            let tasks = stmt
                .query_map(params![prefix], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Unfinished tasks with no scheduled date, optionally per project.
    pub fn list_unscheduled(&self, project_id: Option<&str>) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT t.* FROM tasks t
                 WHERE t.scheduled_date IS NULL AND t.status != 'done'",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(project_id) = project_id {
                sql.push_str(" AND t.project_id = ?1");
                params_vec.push(Box::new(project_id.to_string()));
            }
            sql.push_str(" ORDER BY t.priority, t.created_at");

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Put a task on the calendar. Returns None when no such task exists.
    pub fn schedule_task(&self, id: &str, date: &str) -> StoreResult<Option<Task>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET scheduled_date = ?1, modified_at = ?2 WHERE id = ?3",
                params![date, now_iso(), id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            get_task_internal(conn, id)
        })
    }

    /// Take a task off the calendar. Returns None when no such task exists.
    pub fn unschedule_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET scheduled_date = NULL, modified_at = ?1 WHERE id = ?2",
                params![now_iso(), id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            get_task_internal(conn, id)
        })
    }
}
