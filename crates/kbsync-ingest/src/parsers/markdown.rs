//! Markdown document parser.

use super::{file_stem, DocumentParser, ParsedDocument};
use crate::error::{IngestError, IngestResult};
use kbsync_core::DocumentFormat;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};

/// Parser for Markdown files.
pub struct MarkdownParser {
    /// Whether to keep fenced code blocks in the extracted text.
    preserve_code_blocks: bool,
}

impl MarkdownParser {
    /// Create a new markdown parser.
    pub fn new() -> Self {
        Self {
            preserve_code_blocks: true,
        }
    }

    /// Render markdown to plain text, returning the text and the first H1.
    fn extract_text(&self, markdown: &str) -> (String, Option<String>) {
        let parser = Parser::new(markdown);
        let mut text = String::new();
        let mut title: Option<String> = None;
        let mut in_heading = false;
        let mut heading_level: Option<HeadingLevel> = None;
        let mut current_heading = String::new();

        for event in parser {
            match event {
                Event::Start(Tag::Heading(level, _, _)) => {
                    in_heading = true;
                    heading_level = Some(level);
                    current_heading.clear();
                }
                Event::End(Tag::Heading(_, _, _)) => {
                    in_heading = false;
                    if heading_level == Some(HeadingLevel::H1) && title.is_none() {
                        title = Some(current_heading.trim().to_string());
                    }
                    text.push_str(&current_heading);
                    text.push_str("\n\n");
                    heading_level = None;
                }
                Event::Start(Tag::CodeBlock(_)) => {
                    if self.preserve_code_blocks {
                        text.push_str("\n```\n");
                    }
                }
                Event::End(Tag::CodeBlock(_)) => {
                    if self.preserve_code_blocks {
                        text.push_str("```\n\n");
                    }
                }
                Event::End(Tag::Paragraph) => {
                    text.push_str("\n\n");
                }
                Event::End(Tag::List(_)) => {
                    text.push('\n');
                }
                Event::Start(Tag::Item) => {
                    text.push_str("- ");
                }
                Event::End(Tag::Item) => {
                    text.push('\n');
                }
                Event::Text(t) => {
                    if in_heading {
                        current_heading.push_str(&t);
                    } else {
                        text.push_str(&t);
                    }
                }
                Event::Code(code) => {
                    let target = if in_heading { &mut current_heading } else { &mut text };
                    target.push('`');
                    target.push_str(&code);
                    target.push('`');
                }
                Event::SoftBreak | Event::HardBreak => {
                    text.push('\n');
                }
                _ => {}
            }
        }

        (text.trim().to_string(), title)
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for MarkdownParser {
    fn parse(&self, name: &str, bytes: &[u8]) -> IngestResult<ParsedDocument> {
        let source = std::str::from_utf8(bytes).map_err(|e| IngestError::ParseError {
            name: name.to_string(),
            message: format!("not valid UTF-8: {}", e),
        })?;
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);

        let (text, title) = self.extract_text(source);
        let title = title.unwrap_or_else(|| file_stem(name).to_string());

        Ok(ParsedDocument::new(text).with_title(title))
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Markdown
    }
}
