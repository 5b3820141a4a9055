//! Migration runner behavior against fresh, legacy, and broken stores.

use taskdeck::types::{CreateTaskInput, Status};
use taskdeck::Database;

const EXPECTED_STEPS: [&str; 10] = [
    "ensure_projects_table",
    "ensure_tasks_table",
    "ensure_subtasks_table",
    "ensure_settings_table",
    "ensure_operation_logs_table",
    "ensure_task_executions_table",
    "ensure_task_terminals_table",
    "ensure_task_images_table",
    "ensure_activity_logs_table",
    "migrate_task_status_values",
];

mod fresh_store_tests {
    use super::*;

    #[test]
    fn fresh_run_reports_every_step_in_order() {
        let db = Database::open_in_memory().unwrap();
        let reports = db.run_migrations();

        let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, EXPECTED_STEPS);
        assert!(reports.iter().all(|r| r.success), "{reports:?}");
    }

    #[test]
    fn second_run_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations();
        let reports = db.run_migrations();

        assert!(reports.iter().all(|r| r.success), "{reports:?}");
        for report in &reports {
            if report.name == "migrate_task_status_values" {
                assert_eq!(report.message, "Already applied");
            } else {
                assert_eq!(report.message, "No changes needed", "{}", report.name);
            }
        }
    }

    #[test]
    fn migrated_store_serves_reads_and_writes() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations();

        let full = db
            .create_task(CreateTaskInput {
                title: "works".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(db.get_task_full(&full.task.id).unwrap().is_some());
    }
}

mod legacy_store_tests {
    use super::*;

    /// Build a store shaped like an early release: minimal tasks table, old
    /// status vocabulary, context under context_* columns.
    fn setup_legacy_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority INTEGER DEFAULT 2,
                    category TEXT DEFAULT 'feature',
                    status TEXT DEFAULT 'pending',
                    context_technical_notes TEXT,
                    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                    completed_at TEXT
                );
                INSERT INTO tasks (id, title, status, context_technical_notes) VALUES
                    ('t1', 'one', 'structuring', NULL),
                    ('t2', 'two', 'working', 'old notes'),
                    ('t3', 'three', 'structured', NULL),
                    ('t4', 'four', 'standby', NULL),
                    ('t5', 'five', 'ready_to_review', NULL),
                    ('t6', 'six', 'completed', NULL),
                    ('t7', 'seven', 'pending', NULL);",
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn legacy_statuses_are_rewritten_once() {
        let db = setup_legacy_db();
        let reports = db.run_migrations();
        assert!(reports.iter().all(|r| r.success), "{reports:?}");

        let expect = [
            ("t1", Status::InProgress),
            ("t2", Status::InProgress),
            ("t3", Status::Pending),
            ("t4", Status::Pending),
            ("t5", Status::Pending),
            ("t6", Status::Done),
            ("t7", Status::Pending),
        ];
        for (id, status) in expect {
            let task = db.get_task(id).unwrap().unwrap();
            assert_eq!(task.status, status, "{id}");
        }

        // The guard makes the rewrite a one-shot.
        let second = db.run_migrations();
        let rewrite = second
            .iter()
            .find(|r| r.name == "migrate_task_status_values")
            .unwrap();
        assert_eq!(rewrite.message, "Already applied");
    }

    #[test]
    fn legacy_context_columns_are_copied_forward() {
        let db = setup_legacy_db();
        db.run_migrations();

        let task = db.get_task("t2").unwrap().unwrap();
        assert_eq!(task.context.technical_notes.as_deref(), Some("old notes"));
    }

    #[test]
    fn alter_step_reports_added_columns() {
        let db = setup_legacy_db();
        let reports = db.run_migrations();

        let tasks_step = reports
            .iter()
            .find(|r| r.name == "ensure_tasks_table")
            .unwrap();
        assert!(
            tasks_step.message.contains("ai_metadata"),
            "{}",
            tasks_step.message
        );
    }
}

mod failure_tests {
    use super::*;

    #[test]
    fn failed_step_stops_the_run_with_terminal_record() {
        let db = Database::open_in_memory().unwrap();
        // A view squatting on the subtasks name makes step 3 fail.
        db.with_conn(|conn| {
            conn.execute_batch("CREATE VIEW subtasks AS SELECT 1 AS id;")?;
            Ok(())
        })
        .unwrap();

        let reports = db.run_migrations();
        assert_eq!(reports.len(), 3);
        assert!(reports[0].success);
        assert!(reports[1].success);
        assert!(!reports[2].success);
        assert_eq!(reports[2].name, "migration_error");
        assert!(reports[2].message.contains("ensure_subtasks_table"));

        // Earlier steps stay applied; later steps never ran.
        db.with_conn(|conn| {
            let tasks: bool = conn
                .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'tasks'")?
                .exists([])?;
            let settings: bool = conn
                .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'settings'")?
                .exists([])?;
            assert!(tasks);
            assert!(!settings);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rerun_after_fix_picks_up_where_it_stopped() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("CREATE VIEW subtasks AS SELECT 1 AS id;")?;
            Ok(())
        })
        .unwrap();
        db.run_migrations();

        db.with_conn(|conn| {
            conn.execute_batch("DROP VIEW subtasks;")?;
            Ok(())
        })
        .unwrap();

        let reports = db.run_migrations();
        assert!(reports.iter().all(|r| r.success), "{reports:?}");
        assert_eq!(reports.len(), EXPECTED_STEPS.len());
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn on_disk_store_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdeck.db");

        let db = Database::open(&path).unwrap();
        let reports = db.run_migrations();
        assert!(reports.iter().all(|r| r.success), "{reports:?}");
        let full = db
            .create_task(CreateTaskInput {
                title: "persisted".into(),
                ..Default::default()
            })
            .unwrap();
        db.close().unwrap();

        let db = Database::open(&path).unwrap();
        db.run_migrations();
        let read = db.get_task(&full.task.id).unwrap().unwrap();
        assert_eq!(read.title, "persisted");
        db.close().unwrap();
    }
}
