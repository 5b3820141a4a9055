//! Structured error types for store operations.

use thiserror::Error;

/// Errors surfaced by the store.
///
/// Read misses are not errors; lookup operations return `Ok(None)` and list
/// operations return empty collections instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite constraint (foreign key, unique, check) was violated.
    #[error("constraint violation: {0}")]
    Constraint(rusqlite::Error),

    /// Any other storage-level failure.
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    /// Encoding a JSON column on the write path failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn internal(msg: impl Into<String>) -> Self {
        StoreError::Internal(msg.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(err)
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
