//! Idempotent, additive schema migrations.
//!
//! Every step checks for its tables/columns before issuing DDL, so running
//! the sequence against any historical store shape is safe. There is no
//! transaction around the whole run; a failed step leaves earlier steps
//! applied, and re-running after a fix picks up where it stopped.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreResult;

/// Settings key guarding the one-shot status vocabulary rewrite.
const STATUS_REWRITE_KEY: &str = "status_values_migrated_v2";

/// Outcome of a single migration step.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub name: String,
    pub success: bool,
    pub message: String,
}

type Step = (&'static str, fn(&Connection) -> StoreResult<String>);

const STEPS: &[Step] = &[
    ("ensure_projects_table", ensure_projects_table),
    ("ensure_tasks_table", ensure_tasks_table),
    ("ensure_subtasks_table", ensure_subtasks_table),
    ("ensure_settings_table", ensure_settings_table),
    ("ensure_operation_logs_table", ensure_operation_logs_table),
    ("ensure_task_executions_table", ensure_task_executions_table),
    ("ensure_task_terminals_table", ensure_task_terminals_table),
    ("ensure_task_images_table", ensure_task_images_table),
    ("ensure_activity_logs_table", ensure_activity_logs_table),
    ("migrate_task_status_values", migrate_task_status_values),
];

/// Run every step in order, one report per attempted step.
///
/// On a step failure the run stops and a terminal `migration_error` record is
/// appended; steps already applied stay applied.
pub fn run(conn: &Connection) -> Vec<MigrationReport> {
    let mut reports = Vec::with_capacity(STEPS.len());
    for (name, step) in STEPS {
        match step(conn) {
            Ok(message) => {
                tracing::debug!(step = name, %message, "migration step ok");
                reports.push(MigrationReport {
                    name: (*name).to_string(),
                    success: true,
                    message,
                });
            }
            Err(err) => {
                tracing::error!(step = name, error = %err, "migration step failed");
                reports.push(MigrationReport {
                    name: "migration_error".to_string(),
                    success: false,
                    message: format!("{name}: {err}"),
                });
                break;
            }
        }
    }
    reports
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Add every listed column that is missing. Returns the names added.
fn add_missing_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> StoreResult<Vec<String>> {
    let mut added = Vec::new();
    for (name, ddl) in columns {
        if !column_exists(conn, table, name)? {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {ddl}"), [])?;
            added.push((*name).to_string());
        }
    }
    Ok(added)
}

fn ensure_projects_table(conn: &Connection) -> StoreResult<String> {
    if !table_exists(conn, "projects")? {
        conn.execute_batch(
            "CREATE TABLE projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                description TEXT,
                routes TEXT DEFAULT '[]',
                terminal_config TEXT DEFAULT '{}',
                display_order INTEGER DEFAULT 0,
                color TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        return Ok("Created projects table".to_string());
    }
    let added = add_missing_columns(
        conn,
        "projects",
        &[
            ("routes", "TEXT DEFAULT '[]'"),
            ("terminal_config", "TEXT DEFAULT '{}'"),
            ("display_order", "INTEGER DEFAULT 0"),
            ("color", "TEXT"),
        ],
    )?;
    if added.is_empty() {
        Ok("No changes needed".to_string())
    } else {
        Ok(format!("Added columns: {}", added.join(", ")))
    }
}

fn ensure_tasks_table(conn: &Connection) -> StoreResult<String> {
    if !table_exists(conn, "tasks")? {
        conn.execute_batch(
            "CREATE TABLE tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT REFERENCES projects(id),
                title TEXT NOT NULL,
                description TEXT,
                priority INTEGER DEFAULT 2,
                category TEXT DEFAULT 'feature',
                status TEXT DEFAULT 'pending',
                complexity TEXT,
                due_date TEXT,
                scheduled_date TEXT,
                business_rules TEXT DEFAULT '[]',
                technical_notes TEXT,
                acceptance_criteria TEXT,
                ai_metadata TEXT,
                started_at TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                completed_at TEXT,
                modified_at TEXT,
                modified_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_scheduled_date ON tasks(scheduled_date);",
        )?;
        return Ok("Created tasks table".to_string());
    }
    let added = add_missing_columns(
        conn,
        "tasks",
        &[
            ("project_id", "TEXT REFERENCES projects(id)"),
            ("complexity", "TEXT"),
            ("due_date", "TEXT"),
            ("scheduled_date", "TEXT"),
            ("business_rules", "TEXT DEFAULT '[]'"),
            ("technical_notes", "TEXT"),
            ("acceptance_criteria", "TEXT"),
            ("ai_metadata", "TEXT"),
            ("started_at", "TEXT"),
            ("modified_at", "TEXT"),
            ("modified_by", "TEXT"),
        ],
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id);
         CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
         CREATE INDEX IF NOT EXISTS idx_tasks_scheduled_date ON tasks(scheduled_date);",
    )?;
    if added.is_empty() {
        Ok("No changes needed".to_string())
    } else {
        Ok(format!("Added columns: {}", added.join(", ")))
    }
}

fn ensure_subtasks_table(conn: &Connection) -> StoreResult<String> {
    if !table_exists(conn, "subtasks")? {
        conn.execute_batch(
            "CREATE TABLE subtasks (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                status TEXT DEFAULT 'pending',
                \"order\" INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                acceptance_criteria TEXT,
                technical_notes TEXT,
                prompt_context TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_subtasks_task_id ON subtasks(task_id);",
        )?;
        return Ok("Created subtasks table".to_string());
    }
    let added = add_missing_columns(
        conn,
        "subtasks",
        &[
            ("description", "TEXT"),
            ("acceptance_criteria", "TEXT"),
            ("technical_notes", "TEXT"),
            ("prompt_context", "TEXT"),
            ("completed_at", "TEXT"),
        ],
    )?;
    if added.is_empty() {
        Ok("No changes needed".to_string())
    } else {
        Ok(format!("Added columns: {}", added.join(", ")))
    }
}

fn ensure_settings_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "settings")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok("Created settings table".to_string())
}

fn ensure_operation_logs_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "operation_logs")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE operation_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT,
            operation TEXT NOT NULL,
            payload TEXT,
            actor TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok("Created operation_logs table".to_string())
}

fn ensure_task_executions_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "task_executions")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE task_executions (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            status TEXT DEFAULT 'running',
            started_at TEXT DEFAULT CURRENT_TIMESTAMP,
            last_heartbeat TEXT,
            finished_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions(task_id);",
    )?;
    Ok("Created task_executions table".to_string())
}

fn ensure_task_terminals_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "task_terminals")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE task_terminals (
            task_id TEXT PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            terminal_id TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok("Created task_terminals table".to_string())
}

fn ensure_task_images_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "task_images")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE task_images (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_task_images_task_id ON task_images(task_id);",
    )?;
    Ok("Created task_images table".to_string())
}

fn ensure_activity_logs_table(conn: &Connection) -> StoreResult<String> {
    if table_exists(conn, "activity_logs")? {
        return Ok("No changes needed".to_string());
    }
    conn.execute_batch(
        "CREATE TABLE activity_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT,
            task_id TEXT,
            kind TEXT NOT NULL,
            message TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok("Created activity_logs table".to_string())
}

/// Rewrite the legacy status vocabulary into the current three values and
/// fold legacy `context_*` columns into their current homes. Guarded by a
/// settings key so an already-migrated store is untouched.
fn migrate_task_status_values(conn: &Connection) -> StoreResult<String> {
    let applied: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [STATUS_REWRITE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    if applied.as_deref() == Some("true") {
        return Ok("Already applied".to_string());
    }

    let mut rewritten = 0;
    rewritten += conn.execute(
        "UPDATE tasks SET status = 'in_progress' WHERE status IN ('structuring', 'working')",
        [],
    )?;
    rewritten += conn.execute(
        "UPDATE tasks SET status = 'pending' WHERE status IN ('structured', 'standby', 'ready_to_review')",
        [],
    )?;
    rewritten += conn.execute("UPDATE tasks SET status = 'done' WHERE status = 'completed'", [])?;

    // Pre-split stores kept context under context_* columns.
    let mut copied = Vec::new();
    for (old, new) in [
        ("context_business_rules", "business_rules"),
        ("context_technical_notes", "technical_notes"),
        ("context_acceptance_criteria", "acceptance_criteria"),
    ] {
        if column_exists(conn, "tasks", old)? {
            conn.execute(
                &format!("UPDATE tasks SET {new} = {old} WHERE {old} IS NOT NULL"),
                [],
            )?;
            copied.push(old);
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, 'true')",
        [STATUS_REWRITE_KEY],
    )?;

    let mut message = format!("Rewrote {rewritten} status values");
    if !copied.is_empty() {
        message.push_str(&format!("; copied {}", copied.join(", ")));
    }
    Ok(message)
}
