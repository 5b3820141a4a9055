//! SQLite persistence layer.

pub mod migrations;
pub mod projects;
pub mod subtasks;
pub mod tasks;

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{StoreError, StoreResult};

/// Database handle wrapping a SQLite connection.
///
/// Clones share the same connection behind a mutex; one connection per
/// process, no pooling.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    ///
    /// Schema migrations are not run automatically; call
    /// [`Database::run_migrations`] to bring an existing store up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(&path)?;

        // Enable WAL mode for concurrent readers
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        tracing::info!(path = %path.as_ref().display(), "opened task database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database at the default per-user location, creating the
    /// parent directory when needed.
    pub fn open_default() -> StoreResult<Self> {
        let path = default_db_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run the schema migration steps, returning one report per attempted
    /// step. See [`migrations::run`] for the stop-on-error contract.
    pub fn run_migrations(&self) -> Vec<migrations::MigrationReport> {
        let conn = self.conn.lock().unwrap();
        migrations::run(&conn)
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for
    /// transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }

    /// Close this handle. The underlying connection is released when this is
    /// the last clone; otherwise the remaining clones keep it open.
    pub fn close(self) -> StoreResult<()> {
        if let Ok(mutex) = Arc::try_unwrap(self.conn) {
            let conn = mutex.into_inner().unwrap();
            conn.close().map_err(|(_, err)| StoreError::from(err))?;
            tracing::info!("closed task database");
        }
        Ok(())
    }
}

/// Resolve the default database path under the platform data directory.
pub fn default_db_path() -> StoreResult<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| StoreError::internal("platform data directory unavailable"))?;
    Ok(base.join("taskdeck").join("taskdeck.db"))
}

/// Current time as an RFC 3339 UTC string, the on-disk timestamp format.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Generate a fresh row id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Decode a JSON column, falling back to a default when the stored value is
/// NULL or malformed. Reads stay available even when a collaborator wrote
/// garbage into an encoded column.
pub fn decode_or<T: serde::de::DeserializeOwned>(raw: Option<String>, default: T) -> T {
    match raw {
        Some(s) => serde_json::from_str(&s).unwrap_or(default),
        None => default,
    }
}
