//! Embedded SQLite persistence and query engine for a local task workbench.
//!
//! A single [`db::Database`] handle serves tasks, their subtasks, and the
//! projects they belong to for one local user. Schema evolution is handled by
//! idempotent, additive migration steps (`Database::run_migrations`), and the
//! paginated task listing sorts by a derived progress rank computed from
//! subtask completion.

pub mod db;
pub mod error;
pub mod logging;
pub mod progress;
pub mod types;

pub use db::Database;
pub use error::{StoreError, StoreResult};
