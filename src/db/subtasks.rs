//! Subtask CRUD and ordering.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{decode_or, new_id, now_iso, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::{CreateSubtaskInput, Status, Subtask, UpdateSubtaskInput};

pub(crate) const SUBTASK_COLUMNS: &str = "id, task_id, title, status, \"order\", description, \
     acceptance_criteria, technical_notes, prompt_context, created_at, completed_at";

pub fn parse_subtask_row(row: &Row) -> rusqlite::Result<Subtask> {
    let status: String = row.get("status")?;
    let acceptance_json: Option<String> = row.get("acceptance_criteria")?;

    Ok(Subtask {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        status: Status::parse(&status),
        order: row.get("order")?,
        description: row.get("description")?,
        acceptance_criteria: decode_or(acceptance_json, None),
        technical_notes: row.get("technical_notes")?,
        prompt_context: row.get("prompt_context")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn get_subtask_internal(conn: &Connection, id: &str) -> StoreResult<Option<Subtask>> {
    let subtask = conn
        .query_row(
            &format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = ?1"),
            params![id],
            parse_subtask_row,
        )
        .optional()?;
    Ok(subtask)
}

/// List a task's subtasks in display order using an existing connection.
pub(crate) fn list_subtasks_internal(conn: &Connection, task_id: &str) -> StoreResult<Vec<Subtask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ?1 ORDER BY \"order\""
    ))?;
    let subtasks = stmt
        .query_map(params![task_id], parse_subtask_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subtasks)
}

/// Rewrite "order" to 0..n-1 following the current display order.
fn renumber_subtasks(conn: &Connection, task_id: &str) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "SELECT id FROM subtasks WHERE task_id = ?1 ORDER BY \"order\"",
    )?;
    let ids = stmt
        .query_map(params![task_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (index, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE subtasks SET \"order\" = ?1 WHERE id = ?2",
            params![index as i64, id],
        )?;
    }
    Ok(())
}

impl Database {
    /// Create a subtask. When no order is supplied it is appended after the
    /// task's current last subtask.
    pub fn create_subtask(&self, input: CreateSubtaskInput) -> StoreResult<Subtask> {
        let id = new_id();
        let created_at = now_iso();
        let status = input.status.unwrap_or_default();
        let acceptance_json = input
            .acceptance_criteria
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            let order = match input.order {
                Some(order) => order.max(0),
                None => conn.query_row(
                    "SELECT COALESCE(MAX(\"order\"), -1) + 1 FROM subtasks WHERE task_id = ?1",
                    params![input.task_id],
                    |row| row.get(0),
                )?,
            };

            conn.execute(
                "INSERT INTO subtasks (id, task_id, title, status, \"order\", description,
                     acceptance_criteria, technical_notes, prompt_context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    input.task_id,
                    input.title,
                    status.as_str(),
                    order,
                    input.description,
                    acceptance_json,
                    input.technical_notes,
                    input.prompt_context,
                    created_at,
                ],
            )?;

            get_subtask_internal(conn, &id)?
                .ok_or_else(|| StoreError::internal("subtask row missing after insert"))
        })
    }

    pub fn get_subtask(&self, id: &str) -> StoreResult<Option<Subtask>> {
        self.with_conn(|conn| get_subtask_internal(conn, id))
    }

    /// List a task's subtasks in display order.
    pub fn list_subtasks(&self, task_id: &str) -> StoreResult<Vec<Subtask>> {
        self.with_conn(|conn| list_subtasks_internal(conn, task_id))
    }

    /// Apply a sparse update. Two-level options on the nullable text fields
    /// write NULL when the inner value is absent. Returns None when no such
    /// subtask exists.
    pub fn update_subtask(
        &self,
        id: &str,
        input: UpdateSubtaskInput,
    ) -> StoreResult<Option<Subtask>> {
        let acceptance_json = match input.acceptance_criteria {
            Some(Some(ref criteria)) => Some(Some(serde_json::to_string(criteria)?)),
            Some(None) => Some(None),
            None => None,
        };

        self.with_conn(|conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref title) = input.title {
                sets.push(format!("title = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(title.clone()));
            }
            if let Some(status) = input.status {
                sets.push(format!("status = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(status.as_str()));
                if status == Status::Done {
                    sets.push(format!("completed_at = ?{}", params_vec.len() + 1));
                    params_vec.push(Box::new(now_iso()));
                }
            }
            if let Some(order) = input.order {
                sets.push(format!("\"order\" = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(order.max(0)));
            }
            if let Some(ref description) = input.description {
                sets.push(format!("description = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(description.clone()));
            }
            if let Some(ref json) = acceptance_json {
                sets.push(format!("acceptance_criteria = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(json.clone()));
            }
            if let Some(ref notes) = input.technical_notes {
                sets.push(format!("technical_notes = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(notes.clone()));
            }
            if let Some(ref prompt) = input.prompt_context {
                sets.push(format!("prompt_context = ?{}", params_vec.len() + 1));
                params_vec.push(Box::new(prompt.clone()));
            }

            if sets.is_empty() {
                return get_subtask_internal(conn, id);
            }

            let sql = format!(
                "UPDATE subtasks SET {} WHERE id = ?{}",
                sets.join(", "),
                params_vec.len() + 1
            );
            params_vec.push(Box::new(id.to_string()));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            let updated = conn.execute(&sql, params_refs.as_slice())?;
            if updated == 0 {
                return Ok(None);
            }
            get_subtask_internal(conn, id)
        })
    }

    /// Set a subtask's status. Entering done stamps completed_at; leaving
    /// done keeps the old stamp.
    pub fn update_subtask_status(
        &self,
        id: &str,
        status: Status,
    ) -> StoreResult<Option<Subtask>> {
        self.with_conn(|conn| {
            let updated = if status == Status::Done {
                conn.execute(
                    "UPDATE subtasks SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now_iso(), id],
                )?
            } else {
                conn.execute(
                    "UPDATE subtasks SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )?
            };
            if updated == 0 {
                return Ok(None);
            }
            get_subtask_internal(conn, id)
        })
    }

    /// Rewrite a task's subtask order to match `ordered_ids`.
    ///
    /// One UPDATE per id, scoped to the task; ids belonging to other tasks
    /// are ignored. Not atomic: a failure mid-loop leaves earlier rows
    /// renumbered.
    pub fn reorder_subtasks(
        &self,
        task_id: &str,
        ordered_ids: &[String],
    ) -> StoreResult<Vec<Subtask>> {
        self.with_conn(|conn| {
            for (index, id) in ordered_ids.iter().enumerate() {
                conn.execute(
                    "UPDATE subtasks SET \"order\" = ?1 WHERE id = ?2 AND task_id = ?3",
                    params![index as i64, id, task_id],
                )?;
            }
            list_subtasks_internal(conn, task_id)
        })
    }

    /// Delete a subtask and renumber the survivors so the task's order stays
    /// dense. Returns false when no such subtask exists.
    pub fn delete_subtask(&self, id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let task_id: Option<String> = conn
                .query_row(
                    "SELECT task_id FROM subtasks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(task_id) = task_id else {
                return Ok(false);
            };
            conn.execute("DELETE FROM subtasks WHERE id = ?1", params![id])?;
            renumber_subtasks(conn, &task_id)?;
            Ok(true)
        })
    }

    /// Delete every subtask of a task. Returns the number removed.
    pub fn delete_subtasks_by_task(&self, task_id: &str) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM subtasks WHERE task_id = ?1", params![task_id])?;
            Ok(deleted)
        })
    }
}
