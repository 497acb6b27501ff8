//! PDF document parser.

use super::{file_stem, DocumentParser, ParsedDocument};
use crate::error::{IngestError, IngestResult};
use kbsync_core::DocumentFormat;
use tracing::debug;

/// Parser for PDF files.
pub struct PdfParser;

impl PdfParser {
    /// Create a new PDF parser.
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for PdfParser {
    fn parse(&self, name: &str, bytes: &[u8]) -> IngestResult<ParsedDocument> {
        debug!("Parsing PDF: {}", name);

        let parse_error = |message: String| IngestError::ParseError {
            name: name.to_string(),
            message,
        };

        if !bytes.starts_with(b"%PDF") {
            return Err(parse_error("missing %PDF header".to_string()));
        }

        // pdf-extract panics on some malformed inputs
        let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| parse_error("PDF parser panicked".to_string()))?
            .map_err(|e| parse_error(format!("Failed to extract text from PDF: {}", e)))?;

        let content = clean_pdf_text(&extracted);
        debug!("Extracted {} characters from PDF", content.len());

        Ok(ParsedDocument::new(content).with_title(file_stem(name)))
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }
}

/// Clean up extracted PDF text.
fn clean_pdf_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        // Collapse runs of empty lines
        .fold(Vec::new(), |mut acc, line| {
            let last_was_empty = acc.last().map(|s: &String| s.is_empty()).unwrap_or(false);
            if !(line.is_empty() && last_was_empty) {
                acc.push(line.to_string());
            }
            acc
        })
        .join("\n")
        // Form feeds mark page breaks
        .replace('\x0C', "\n\n")
}
