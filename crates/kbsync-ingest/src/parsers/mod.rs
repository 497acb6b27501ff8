//! Format-aware text extraction.

mod markdown;
mod pdf;
mod text;

pub use markdown::MarkdownParser;
pub use pdf::PdfParser;
pub use text::TextParser;

use crate::error::IngestResult;
use kbsync_core::DocumentFormat;

/// Text extracted from one document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// The main text content.
    pub content: String,
    /// Document title (if extracted).
    pub title: Option<String>,
}

impl ParsedDocument {
    /// Create a new parsed document.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Trait for document parsers.
pub trait DocumentParser: Send + Sync {
    /// Extract text from the raw bytes of a file called `name`.
    fn parse(&self, name: &str, bytes: &[u8]) -> IngestResult<ParsedDocument>;

    /// The format this parser handles.
    fn format(&self) -> DocumentFormat;
}

/// Get the parser for a document format.
pub fn parser_for(format: DocumentFormat) -> Box<dyn DocumentParser> {
    match format {
        DocumentFormat::Pdf => Box::new(PdfParser::new()),
        DocumentFormat::Markdown => Box::new(MarkdownParser::new()),
        DocumentFormat::PlainText => Box::new(TextParser::new()),
    }
}

/// File name without directories or extension, used as a fallback title.
pub(crate) fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_dispatch() {
        for format in [DocumentFormat::Pdf, DocumentFormat::Markdown, DocumentFormat::PlainText] {
            assert_eq!(parser_for(format).format(), format);
        }
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("docs/notes/today.md"), "today");
        assert_eq!(file_stem("README"), "README");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
