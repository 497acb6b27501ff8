//! Error types for sync orchestration and job management.

use kbsync_db::DbError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised outside a run's per-file boundary.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] kbsync_core::Error),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job runner is shut down")]
    ShutDown,
}
