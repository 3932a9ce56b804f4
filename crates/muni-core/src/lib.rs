//! Muni Core - Domain model, errors and configuration
//!
//! This crate defines the shared pieces of the muni RAG pipeline:
//! - The `Section` unit of persisted knowledge
//! - The `MuniError` taxonomy used across all crates
//! - Configuration loaded from environment and TOML files

pub mod config;

pub use config::{
    AppConfig, ConfigError, LlmConfig, LlmProvider, OcrConfig, PathsConfig, RetrievalConfig,
    SplitterConfig,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Error taxonomy for the pipeline.
///
/// `MissingInput` is reported at the boundary where the file was expected
/// and never crashes the process. The per-collaborator variants propagate
/// through ingestion and generation; the inspector catches them per check.
#[derive(Error, Debug)]
pub enum MuniError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("OCR service error: {0}")]
    Ocr(String),

    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    Store(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MuniError>;

// ============================================================================
// Domain Model
// ============================================================================

/// A unit of persisted knowledge: one municipal-code section or one
/// fallback chunk. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Text body of the section.
    pub content: String,

    /// Dotted numeric identifier (e.g. "12.04.010") when parsed by the
    /// structured splitter; `None` for fallback chunks.
    pub section: Option<String>,
}

impl Section {
    /// Create a labeled section.
    pub fn new(section: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            section: Some(section.into()),
        }
    }

    /// Create an unlabeled chunk.
    pub fn chunk(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            section: None,
        }
    }

    /// Identifier to display, "N/A" when the section is an unlabeled chunk.
    pub fn label(&self) -> &str {
        self.section.as_deref().unwrap_or("N/A")
    }

    /// Content preview capped at `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            self.content.clone()
        } else {
            let cut: String = self.content.chars().take(max_chars).collect();
            format!("{cut}...")
        }
    }
}

/// One retrieval result: a section with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredSection {
    pub section: Section,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_label() {
        let s = Section::new("12.04.010", "No fences over 6 feet.");
        assert_eq!(s.label(), "12.04.010");

        let c = Section::chunk("some text");
        assert_eq!(c.label(), "N/A");
        assert!(c.section.is_none());
    }

    #[test]
    fn test_preview_truncation() {
        let s = Section::chunk("abcdefghij");
        assert_eq!(s.preview(20), "abcdefghij");
        assert_eq!(s.preview(4), "abcd...");
    }

    #[test]
    fn test_preview_is_char_safe() {
        let s = Section::chunk("조례 제1조 총칙");
        // Must not panic on multi-byte boundaries
        let p = s.preview(3);
        assert!(p.starts_with("조례 "));
    }
}
