//! Document Processor: raw bytes in, chunk windows out.

use crate::chunker::{normalize_text, ChunkConfig, ChunkWindows};
use crate::parsers::parser_for;
use kbsync_core::{DocumentFormat, Error, RemoteFile, Result};
use tracing::debug;

/// Converts file bytes into normalized text and chunks.
#[derive(Debug, Clone, Default)]
pub struct DocumentProcessor {
    config: ChunkConfig,
}

/// A successfully extracted document, ready to be chunked.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub connector_id: String,
    pub file_id: String,
    pub path: String,
    pub format: DocumentFormat,
    pub title: Option<String>,
    /// Normalized text.
    pub text: String,
    config: ChunkConfig,
}

impl ProcessedDocument {
    /// Iterate the document's chunks. Each call starts from the beginning.
    pub fn chunks(&self) -> ChunkWindows<'_> {
        ChunkWindows::new(&self.text, self.config.clone(), &self.connector_id, &self.file_id)
    }
}

impl DocumentProcessor {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Extract a file's text in its declared format.
    ///
    /// Extraction is all-or-nothing: chunks are only reachable through the
    /// returned document, which exists only when extraction succeeded.
    pub fn process(&self, connector_id: &str, file: &RemoteFile, bytes: &[u8]) -> Result<ProcessedDocument> {
        let format = file.format().ok_or_else(|| {
            Error::UnsupportedFormat(match &file.mime_type {
                Some(mime) => format!("{} ({})", file.path, mime),
                None => file.path.clone(),
            })
        })?;

        let parsed = parser_for(format).parse(&file.path, bytes)?;
        let text = normalize_text(&parsed.content);
        debug!(
            file = %file.file_id,
            format = %format,
            chars = text.chars().count(),
            "Extracted document"
        );

        Ok(ProcessedDocument {
            connector_id: connector_id.to_string(),
            file_id: file.file_id.clone(),
            path: file.path.clone(),
            format,
            title: parsed.title,
            text,
            config: self.config.clone(),
        })
    }
}
