//! Database error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A compare-and-set update lost against a concurrent writer.
    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for kbsync_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(msg) => kbsync_core::Error::StateConflict(msg),
            other => kbsync_core::Error::Storage(other.to_string()),
        }
    }
}
