//! Muni OCR - Document partitioning and text cache
//!
//! Full-document text comes either from a plain-text cache file or from an
//! external partitioning service run against the source PDF. The cache is
//! trusted unconditionally: once written, OCR is never re-run until the
//! file is deleted by hand.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use muni_core::{MuniError, OcrConfig, Result};
use reqwest::multipart;
use serde::Deserialize;

/// Separator used to join partitioned elements into one text blob.
const ELEMENT_SEPARATOR: &str = "\n\n";

// ============================================================================
// Partitioner Trait
// ============================================================================

/// The external OCR/partitioning collaborator: a PDF goes in, the ordered
/// text of its structural elements comes out.
#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, pdf_path: &Path) -> Result<Vec<String>>;
}

// ============================================================================
// Unstructured API Client
// ============================================================================

/// Client for an unstructured-io style partitioning endpoint.
///
/// Uploads the PDF as multipart form data along with the partitioning
/// strategy and table-structure flag; the response is a JSON array of
/// elements whose `text` fields are the extracted content.
pub struct UnstructuredClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    strategy: String,
    infer_table_structure: bool,
}

#[derive(Debug, Deserialize)]
struct PartitionElement {
    #[serde(default)]
    text: String,
}

impl UnstructuredClient {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            strategy: config.strategy.clone(),
            infer_table_structure: config.infer_table_structure,
        }
    }
}

#[async_trait]
impl Partitioner for UnstructuredClient {
    async fn partition(&self, pdf_path: &Path) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(pdf_path).await?;

        let file_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| MuniError::Ocr(format!("Invalid upload part: {e}")))?;

        let form = multipart::Form::new()
            .part("files", part)
            .text("strategy", self.strategy.clone())
            .text(
                "pdf_infer_table_structure",
                self.infer_table_structure.to_string(),
            );

        let mut request = self
            .client
            .post(format!("{}/general/v0/general", self.endpoint))
            .header("Accept", "application/json")
            .multipart(form);

        if let Some(ref key) = self.api_key {
            request = request.header("unstructured-api-key", key.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| MuniError::Ocr(format!("Partition request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MuniError::Ocr(format!(
                "Partitioning service error: {error_text}"
            )));
        }

        let elements: Vec<PartitionElement> = response
            .json()
            .await
            .map_err(|e| MuniError::Ocr(format!("Failed to parse partition response: {e}")))?;

        Ok(elements.into_iter().map(|e| e.text).collect())
    }
}

// ============================================================================
// Cache Loader
// ============================================================================

/// Obtain the full document text, from cache when available.
///
/// Returns `Ok(None)` when the source PDF is missing (reported, not fatal).
/// On a cold run the partitioned elements are joined with blank lines and
/// written to `cache_path` exactly once; partitioning errors propagate.
pub async fn get_text(
    pdf_path: &Path,
    cache_path: &Path,
    partitioner: &dyn Partitioner,
) -> Result<Option<String>> {
    if cache_path.exists() {
        tracing::info!("Found cached OCR text, loading from {}", cache_path.display());
        let text = tokio::fs::read_to_string(cache_path).await?;
        return Ok(Some(text));
    }

    if !pdf_path.exists() {
        tracing::error!("Source PDF not found at {}", pdf_path.display());
        return Ok(None);
    }

    tracing::info!(
        "No cache found, starting OCR on {} (this may take a few minutes)",
        pdf_path.display()
    );
    let start = Instant::now();

    let elements = partitioner.partition(pdf_path).await?;
    let full_text = elements.join(ELEMENT_SEPARATOR);

    tracing::info!("OCR finished in {:.2}s", start.elapsed().as_secs_f64());

    tracing::info!("Saving OCR text to cache file {}", cache_path.display());
    tokio::fs::write(cache_path, &full_text).await?;

    Ok(Some(full_text))
}
