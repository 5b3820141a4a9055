//! Project rows referenced by tasks.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{decode_or, new_id, now_iso, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::Project;

const PROJECT_COLUMNS: &str =
    "id, name, path, description, routes, terminal_config, display_order, color, created_at";

impl Database {
    /// Create a project.
    pub fn create_project(
        &self,
        name: &str,
        path: &str,
        description: Option<&str>,
    ) -> StoreResult<Project> {
        let id = new_id();
        let created_at = now_iso();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, path, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, path, description, created_at],
            )?;
            get_project_internal(conn, &id)?
                .ok_or_else(|| StoreError::internal("project row missing after insert"))
        })
    }

    pub fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        self.with_conn(|conn| get_project_internal(conn, id))
    }

    pub fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY display_order, name"
            ))?;
            let projects = stmt
                .query_map([], parse_project_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
    }

    /// Delete a project and every task and subtask underneath it.
    /// Returns false when no such project exists.
    pub fn delete_project(&self, id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM subtasks
                 WHERE task_id IN (SELECT id FROM tasks WHERE project_id = ?1)",
                params![id],
            )?;
            conn.execute("DELETE FROM tasks WHERE project_id = ?1", params![id])?;
            let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }
}

fn get_project_internal(conn: &Connection, id: &str) -> StoreResult<Option<Project>> {
    let project = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            parse_project_row,
        )
        .optional()?;
    Ok(project)
}

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    let routes_json: Option<String> = row.get("routes")?;
    let terminal_config_json: Option<String> = row.get("terminal_config")?;

    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        description: row.get("description")?,
        routes: decode_or(routes_json, serde_json::Value::Array(Vec::new())),
        terminal_config: decode_or(terminal_config_json, serde_json::json!({})),
        display_order: row.get::<_, Option<i64>>("display_order")?.unwrap_or(0),
        color: row.get("color")?,
        created_at: row.get("created_at")?,
    })
}
