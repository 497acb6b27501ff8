//! Error types for kbsync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type shared by every stage of a sync run.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote source could not be reached or refused our credentials.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A file disappeared between listing and reading.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index write failed: {0}")]
    IndexWriteFailed(String),

    /// Another writer committed the same sync-state row first.
    #[error("Sync state changed concurrently for {0}")]
    StateConflict(String),

    #[error("Timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using kbsync's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Classify the error for the sync-run log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            Error::IndexWriteFailed(_) => ErrorKind::IndexWriteFailed,
            Error::StateConflict(_) => ErrorKind::StateConflict,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Storage(_) | Error::Io(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Connector-level errors abort a run; everything else is file-scoped.
    pub fn is_connector_level(&self) -> bool {
        matches!(self, Error::SourceUnavailable(_))
    }
}

/// Serialisable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    NotFound,
    UnsupportedFormat,
    ExtractionFailed,
    EmbeddingFailed,
    IndexWriteFailed,
    StateConflict,
    Timeout,
    Cancelled,
    Storage,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ExtractionFailed => "extraction_failed",
            ErrorKind::EmbeddingFailed => "embedding_failed",
            ErrorKind::IndexWriteFailed => "index_write_failed",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "source_unavailable" => Some(ErrorKind::SourceUnavailable),
            "not_found" => Some(ErrorKind::NotFound),
            "unsupported_format" => Some(ErrorKind::UnsupportedFormat),
            "extraction_failed" => Some(ErrorKind::ExtractionFailed),
            "embedding_failed" => Some(ErrorKind::EmbeddingFailed),
            "index_write_failed" => Some(ErrorKind::IndexWriteFailed),
            "state_conflict" => Some(ErrorKind::StateConflict),
            "timeout" => Some(ErrorKind::Timeout),
            "cancelled" => Some(ErrorKind::Cancelled),
            "storage" => Some(ErrorKind::Storage),
            "config" => Some(ErrorKind::Config),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
