//! Error types for content stores and document processing.

use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while reading or converting documents.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Parse error for {name}: {message}")]
    ParseError { name: String, message: String },

    #[error("No credential available for '{0}'")]
    MissingCredential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    WatchError(String),
}

impl From<IngestError> for kbsync_core::Error {
    fn from(err: IngestError) -> Self {
        use kbsync_core::Error;
        match err {
            IngestError::Io(e) => Error::Io(e),
            IngestError::UnsupportedFileType(t) => Error::UnsupportedFormat(t),
            e @ IngestError::ParseError { .. } => Error::ExtractionFailed(e.to_string()),
            e @ (IngestError::MissingCredential(_) | IngestError::Http(_)) => {
                Error::SourceUnavailable(e.to_string())
            }
            IngestError::WatchError(msg) => Error::Storage(msg),
        }
    }
}
