//! Muni Parser - Section splitting for extracted document text
//!
//! The primary strategy parses municipal-code style section identifiers
//! (three dot-separated numeric groups, e.g. `12.04.010`) and treats the
//! text between identifiers as that section's content. When too few
//! sections are found the whole text is re-split into fixed-size
//! overlapping chunks instead, preferring paragraph, sentence and word
//! boundaries over hard cuts.

use muni_core::{Section, SplitterConfig};
use regex::Regex;

/// Pattern for a structured section identifier: three dot-separated
/// numeric groups.
const SECTION_PATTERN: &str = r"\d+\.\d+\.\d+";

/// Splits raw document text into `Section`s.
pub struct SectionSplitter {
    pattern: Regex,
    config: SplitterConfig,
}

impl SectionSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            // The pattern is a checked constant
            pattern: Regex::new(SECTION_PATTERN).expect("invalid section pattern"),
            config,
        }
    }

    /// Split text into sections, in document order.
    ///
    /// Falls back to fixed-size chunking when the identifier scan yields
    /// fewer than `min_sections` sections; fallback chunks carry no
    /// identifier. Deterministic for identical input and config.
    pub fn split(&self, text: &str) -> Vec<Section> {
        let sections = self.parse_sections(text);

        if sections.len() < self.config.min_sections {
            tracing::warn!(
                "Only {} sections parsed (need {}), using fallback chunking",
                sections.len(),
                self.config.min_sections
            );
            return self.chunk_text(text);
        }

        sections
    }

    /// Primary strategy: identifiers as delimiters, following text as content.
    fn parse_sections(&self, text: &str) -> Vec<Section> {
        let matches: Vec<_> = self.pattern.find_iter(text).collect();
        let mut sections = Vec::with_capacity(matches.len());

        for (i, m) in matches.iter().enumerate() {
            let content_end = matches
                .get(i + 1)
                .map(|next| next.start())
                .unwrap_or(text.len());
            let content = text[m.end()..content_end].trim();

            // A trailing identifier with nothing after it is dropped
            if i + 1 == matches.len() && content.is_empty() {
                continue;
            }

            sections.push(Section::new(m.as_str(), content));
        }

        sections
    }

    /// Fallback strategy: overlapping windows of at most `chunk_size`
    /// characters, breaking on paragraph, sentence, line or word
    /// boundaries where possible.
    fn chunk_text(&self, text: &str) -> Vec<Section> {
        let chunk_size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(chunk_size.saturating_sub(1));

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < text.len() {
            let window_end = advance_chars(text, start, chunk_size);

            let end = if window_end < text.len() {
                find_break_point(text, start, window_end)
            } else {
                window_end
            };

            let content = text[start..end].trim();
            if !content.is_empty() {
                chunks.push(Section::chunk(content));
            }

            if end >= text.len() {
                break;
            }

            // Step back by the overlap, always making forward progress
            let next = back_up_chars(text, end, overlap);
            start = if next > start {
                next
            } else {
                advance_chars(text, start, 1)
            };
        }

        chunks
    }
}

/// Byte offset `n` characters forward of `start`, clamped to the text end.
fn advance_chars(text: &str, start: usize, n: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| start + i)
        .unwrap_or(text.len())
}

/// Byte offset `n` characters back from `end`.
fn back_up_chars(text: &str, end: usize, n: usize) -> usize {
    if n == 0 {
        return end;
    }
    text[..end]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Find a break point at or before `target`, searching the last stretch of
/// the window for a paragraph break, then a sentence end, then a line
/// break, then whitespace, before falling back to a hard cut.
fn find_break_point(text: &str, start: usize, target: usize) -> usize {
    let search_start = back_up_chars(text, target, 100).max(start);
    let window = &text[search_start..target];

    if let Some(pos) = window.rfind("\n\n") {
        return search_start + pos + 2;
    }

    for pattern in [". ", "! ", "? "] {
        if let Some(pos) = window.rfind(pattern) {
            return search_start + pos + pattern.len();
        }
    }

    if let Some(pos) = window.rfind('\n') {
        return search_start + pos + 1;
    }

    if let Some(pos) = window.rfind(' ') {
        return search_start + pos + 1;
    }

    target
}
