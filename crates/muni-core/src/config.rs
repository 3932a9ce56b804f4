//! Configuration management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults matching the pipeline's stock paths and sampling settings.
//! Configuration is passed explicitly into each collaborator constructor;
//! nothing here mutates ambient process state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Filesystem paths (source PDF, OCR cache, vector store)
    pub paths: PathsConfig,

    /// OCR/partitioning service
    pub ocr: OcrConfig,

    /// Embedding and chat model provider
    pub llm: LlmConfig,

    /// Section splitting and fallback chunking
    pub splitter: SplitterConfig,

    /// Retrieval settings
    pub retrieval: RetrievalConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MUNI_PDF_PATH") {
            config.paths.pdf_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MUNI_OCR_CACHE") {
            config.paths.ocr_cache = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MUNI_DB_PATH") {
            config.paths.db_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("UNSTRUCTURED_URL") {
            config.ocr.endpoint = url;
        }
        if let Ok(key) = std::env::var("UNSTRUCTURED_API_KEY") {
            config.ocr.api_key = Some(key);
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.openai_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(k) = std::env::var("MUNI_TOP_K") {
            config.retrieval.top_k = k.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MUNI_TOP_K".to_string(),
                value: k,
            })?;
        }

        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }
}

/// Filesystem paths used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Source PDF to extract
    pub pdf_path: PathBuf,

    /// Plain-text OCR cache. If present it is trusted unconditionally and
    /// OCR is never re-run; delete it to force re-extraction.
    pub ocr_cache: PathBuf,

    /// Persisted vector-store directory
    pub db_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pdf_path: PathBuf::from("source_data/test_file.pdf"),
            ocr_cache: PathBuf::from("full_text_ocr.txt"),
            db_path: PathBuf::from("chroma_db"),
        }
    }
}

/// OCR/partitioning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Partitioning API endpoint
    pub endpoint: String,

    /// API key, if the endpoint requires one
    pub api_key: Option<String>,

    /// Partitioning strategy
    pub strategy: String,

    /// Infer table structure during partitioning
    pub infer_table_structure: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            api_key: None,
            strategy: "hi_res".to_string(),
            infer_table_structure: true,
        }
    }
}

/// Embedding and chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider for both embedding and chat models
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Chat model name
    pub model: String,

    /// Embedding model name. Must match the model used at ingestion time;
    /// the store manifest enforces this at query time.
    pub embedding_model: String,

    /// Maximum tokens for a generated answer
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_tokens: 1500,
            temperature: 0.3,
        }
    }
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Section splitting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Minimum number of regex-parsed sections before the splitter falls
    /// back to fixed-size chunking
    pub min_sections: usize,

    /// Fallback chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive fallback chunks in characters
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            min_sections: 10,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of sections retrieved per question
    pub top_k: usize,

    /// Collection name inside the vector store
    pub collection: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            collection: "sections".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level directive; RUST_LOG takes precedence when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for crate::MuniError {
    fn from(e: ConfigError) -> Self {
        crate::MuniError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.paths.db_path, PathBuf::from("chroma_db"));
        assert_eq!(config.paths.ocr_cache, PathBuf::from("full_text_ocr.txt"));
        assert_eq!(config.ocr.strategy, "hi_res");
        assert!(config.ocr.infer_table_structure);
        assert_eq!(config.llm.max_tokens, 1500);
        assert_eq!(config.llm.temperature, 0.3);
        assert_eq!(config.splitter.min_sections, 10);
        assert_eq!(config.splitter.chunk_size, 1000);
        assert_eq!(config.splitter.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn test_from_env_overrides_and_rejects_bad_values() {
        // One test for all env-var cases so parallel tests never race on
        // process environment.
        std::env::set_var("MUNI_PDF_PATH", "elsewhere/code.pdf");
        std::env::set_var("MUNI_DB_PATH", "elsewhere/db");
        std::env::set_var("EMBEDDING_MODEL", "text-embedding-3-large");
        std::env::set_var("LLM_PROVIDER", "ollama");
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("MUNI_TOP_K", "7");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.paths.pdf_path, PathBuf::from("elsewhere/code.pdf"));
        assert_eq!(config.paths.db_path, PathBuf::from("elsewhere/db"));
        // Untouched vars keep their defaults
        assert_eq!(config.paths.ocr_cache, PathBuf::from("full_text_ocr.txt"));
        assert_eq!(config.llm.embedding_model, "text-embedding-3-large");
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.retrieval.top_k, 7);

        std::env::set_var("MUNI_TOP_K", "three");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, ref value }
                if key == "MUNI_TOP_K" && value == "three"
        ));

        for var in [
            "MUNI_PDF_PATH",
            "MUNI_DB_PATH",
            "EMBEDDING_MODEL",
            "LLM_PROVIDER",
            "LOG_LEVEL",
            "MUNI_TOP_K",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert!("bedrock".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [paths]
            pdf_path = "docs/code.pdf"
            ocr_cache = "cache.txt"
            db_path = "store"

            [retrieval]
            top_k = 5
            collection = "sections"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.paths.pdf_path, PathBuf::from("docs/code.pdf"));
        assert_eq!(config.retrieval.top_k, 5);
        // Unspecified tables fall back to defaults
        assert_eq!(config.splitter.chunk_size, 1000);
    }
}
