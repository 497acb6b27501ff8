//! Fixed-size overlapping character windows over normalized text.
//!
//! Window size and overlap are the same for every format so retrieval
//! behaves consistently regardless of where a document came from.

use kbsync_core::{Chunk, IndexKey};

/// Configuration for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum size of each chunk in characters.
    pub chunk_size: usize,
    /// Number of characters shared by consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// Create config from processing settings.
    pub fn from_processing_config(config: &kbsync_config::ProcessingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
        }
    }
}

/// Normalize extracted text before windowing.
///
/// Line endings become `\n`, form feeds become paragraph breaks, trailing
/// whitespace is trimmed per line and runs of blank lines collapse to one.
pub fn normalize_text(text: &str) -> String {
    let unified = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\x0C', "\n\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

/// Lazy iterator over the chunks of one document.
///
/// Chunks carry deterministic ordinals, so iterating the same text twice
/// yields identical keys.
pub struct ChunkWindows<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()`.
    bounds: Vec<usize>,
    config: ChunkConfig,
    connector_id: &'a str,
    file_id: &'a str,
    /// Next window start, in chars.
    start: usize,
    ordinal: u32,
    done: bool,
}

impl<'a> ChunkWindows<'a> {
    pub fn new(text: &'a str, config: ChunkConfig, connector_id: &'a str, file_id: &'a str) -> Self {
        let bounds = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        Self {
            text,
            bounds,
            config,
            connector_id,
            file_id,
            start: 0,
            ordinal: 0,
            done: false,
        }
    }

    fn char_count(&self) -> usize {
        self.bounds.len() - 1
    }

    fn slice(&self, from: usize, to: usize) -> &'a str {
        &self.text[self.bounds[from]..self.bounds[to]]
    }

    /// End of the window starting at `start`, preferring a whitespace
    /// boundary in the second half of the window.
    fn window_end(&self, start: usize) -> usize {
        let len = self.char_count();
        let hard_end = (start + self.config.chunk_size).min(len);
        if hard_end == len {
            return len;
        }

        let floor = start + self.config.chunk_size / 2;
        let window = self.slice(floor, hard_end);
        match window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((byte_idx, _)) => {
                let absolute = self.bounds[floor] + byte_idx;
                // Convert the byte offset back to a char offset
                let chars_before = self.bounds[floor..hard_end]
                    .iter()
                    .take_while(|&&b| b < absolute)
                    .count();
                (floor + chars_before).max(start + 1)
            }
            None => hard_end,
        }
    }

    /// Start of the window after one ending at `end`, backed off by the
    /// overlap and moved forward to the next word if one starts in time.
    fn next_start(&self, start: usize, end: usize) -> usize {
        let candidate = end.saturating_sub(self.config.chunk_overlap).max(start + 1);
        if candidate >= end || self.slice(candidate - 1, candidate).chars().all(char::is_whitespace) {
            return candidate;
        }

        match self.slice(candidate, end).chars().position(char::is_whitespace) {
            Some(offset) if candidate + offset + 1 < end => candidate + offset + 1,
            _ => candidate,
        }
    }
}

impl Iterator for ChunkWindows<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let len = self.char_count();

        while !self.done && self.start < len {
            let start = self.start;
            let end = self.window_end(start);

            if end >= len {
                self.done = true;
            } else {
                self.start = self.next_start(start, end);
            }

            let raw = self.slice(start, end);
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }

            let leading = raw.len() - raw.trim_start().len();
            let leading_chars = raw[..leading].chars().count();

            let chunk = Chunk {
                key: IndexKey::new(self.connector_id, self.file_id, self.ordinal),
                text: text.to_string(),
                start_offset: start + leading_chars,
            };
            self.ordinal += 1;
            return Some(chunk);
        }

        None
    }
}
