//! Error types for Ollama operations.

use kbsync_core::BackendError;
use thiserror::Error;

/// Errors that can occur when interacting with Ollama.
#[derive(Error, Debug)]
pub enum OllamaError {
    /// Request timeout.
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The requested model is not available.
    #[error("Model not found: {model}. Run 'ollama pull {model}' to download it.")]
    ModelNotFound { model: String },

    /// Ollama server is not running.
    #[error("Ollama server is not running at {host}. Start it with 'ollama serve'.")]
    ServerNotRunning { host: String },

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OllamaError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OllamaError::Timeout { .. } | OllamaError::ServerNotRunning { .. } => true,
            OllamaError::ApiError { status, .. } => *status == 429 || *status >= 500,
            OllamaError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            OllamaError::ModelNotFound { .. } | OllamaError::ParseError(_) => false,
        }
    }
}

impl From<OllamaError> for BackendError {
    fn from(err: OllamaError) -> Self {
        if err.is_transient() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::InvalidInput(err.to_string())
        }
    }
}

/// Result type for Ollama operations.
pub type OllamaResult<T> = Result<T, OllamaError>;
