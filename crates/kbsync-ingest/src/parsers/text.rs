//! Plain text document parser.

use super::{file_stem, DocumentParser, ParsedDocument};
use crate::error::{IngestError, IngestResult};
use kbsync_core::DocumentFormat;

/// Parser for UTF-8 plain text files.
pub struct TextParser;

impl TextParser {
    /// Create a new text parser.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for TextParser {
    fn parse(&self, name: &str, bytes: &[u8]) -> IngestResult<ParsedDocument> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

        let content = std::str::from_utf8(bytes).map_err(|e| IngestError::ParseError {
            name: name.to_string(),
            message: format!("not valid UTF-8: {}", e),
        })?;

        Ok(ParsedDocument::new(content).with_title(file_stem(name)))
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::PlainText
    }
}
