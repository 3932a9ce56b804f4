//! Persistent local vector store
//!
//! A store is a directory holding one subdirectory per collection, each
//! with a `manifest.json` (model identity, dimension, count) and a
//! `records.json` (embedded sections). Search is brute-force cosine
//! similarity over the loaded records. Ingestion always rebuilds a
//! collection from scratch: the new collection is written to a temporary
//! sibling directory and swapped into place, so an interrupted rebuild
//! leaves the previous store usable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use muni_core::{MuniError, Result, ScoredSection, Section};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::EmbeddingClient;

const MANIFEST_FILE: &str = "manifest.json";
const RECORDS_FILE: &str = "records.json";

// ============================================================================
// On-disk format
// ============================================================================

/// Collection metadata, written once at rebuild time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Embedding model the records were built with. Checked on open so a
    /// mismatched query-time model is rejected instead of silently
    /// degrading retrieval.
    pub embedding_model: String,
    pub dimension: usize,
    pub count: usize,
    pub created_at: DateTime<Utc>,
}

/// One persisted (embedding, section) record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: Uuid,
    vector: Vec<f32>,
    content: String,
    section: Option<String>,
}

/// Name and record count of one collection, for inspection.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub count: usize,
}

// ============================================================================
// Store trait
// ============================================================================

/// Read capabilities of the persisted store, shared by the inspector and
/// the retriever.
pub trait SectionStore: Send + Sync {
    fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    fn count(&self, collection: &str) -> Result<usize>;

    /// Top-k records nearest to `query` under cosine similarity. An empty
    /// collection yields an empty result, not an error.
    fn similarity_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredSection>>;
}

// ============================================================================
// LocalStore
// ============================================================================

/// Directory-backed store implementation.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    expected_model: Option<String>,
}

impl LocalStore {
    /// Open an existing store directory.
    ///
    /// A missing directory is a `MissingInput` so callers can report the
    /// distinct "not found" condition.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(MuniError::MissingInput(format!(
                "Database directory not found at '{}'",
                root.display()
            )));
        }
        Ok(Self {
            root,
            expected_model: None,
        })
    }

    /// Require collections to have been built with the given embedding
    /// model; opening a collection with a different manifest model fails.
    pub fn with_expected_model(mut self, model_id: impl Into<String>) -> Self {
        self.expected_model = Some(model_id.into());
        self
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn load_manifest(&self, name: &str) -> Result<Manifest> {
        let path = self.collection_dir(name).join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MuniError::Store(format!("Failed to read manifest '{}': {e}", path.display()))
        })?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| MuniError::Store(format!("Corrupt manifest: {e}")))?;

        if let Some(ref expected) = self.expected_model {
            if manifest.embedding_model != *expected {
                return Err(MuniError::Store(format!(
                    "Collection '{}' was built with embedding model '{}' but '{}' is configured; \
                     rebuild the index or change EMBEDDING_MODEL",
                    name, manifest.embedding_model, expected
                )));
            }
        }

        Ok(manifest)
    }

    fn load_records(&self, name: &str) -> Result<Vec<Record>> {
        let path = self.collection_dir(name).join(RECORDS_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MuniError::Store(format!("Failed to read records '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| MuniError::Store(format!("Corrupt records file: {e}")))
    }
}

impl SectionStore for LocalStore {
    fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut collections = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().join(MANIFEST_FILE).exists() {
                continue;
            }
            let manifest = self.load_manifest(&name)?;
            collections.push(CollectionInfo {
                name,
                count: manifest.count,
            });
        }

        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.load_manifest(collection)?.count)
    }

    fn similarity_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredSection>> {
        // Manifest load enforces the model check even when records are empty
        self.load_manifest(collection)?;
        let records = self.load_records(collection)?;

        let mut scored: Vec<ScoredSection> = records
            .into_iter()
            .map(|r| ScoredSection {
                score: cosine_similarity(query, &r.vector),
                section: Section {
                    content: r.content,
                    section: r.section,
                },
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

// ============================================================================
// Rebuild
// ============================================================================

/// Outcome of a rebuild, for reporting.
#[derive(Debug)]
pub struct RebuildReport {
    /// Records persisted (equals the input section count).
    pub count: usize,

    /// Results of the post-rebuild sample query.
    pub sample_results: Vec<ScoredSection>,
}

/// Embed every section and rebuild the collection at `db_path` from
/// scratch, then verify by re-opening the store, checking the record
/// count and running one sample similarity query.
///
/// The previous store contents are fully replaced; nothing is upserted
/// incrementally.
pub async fn rebuild_index(
    sections: &[Section],
    embeddings: &dyn EmbeddingClient,
    db_path: &Path,
    collection: &str,
    sample_query: &str,
) -> Result<RebuildReport> {
    tracing::info!("Embedding {} sections", sections.len());
    let texts: Vec<String> = sections.iter().map(|s| s.content.clone()).collect();
    let vectors = embeddings.embed_batch(&texts).await?;

    if vectors.len() != sections.len() {
        return Err(MuniError::Embedding(format!(
            "Embedding service returned {} vectors for {} sections",
            vectors.len(),
            sections.len()
        )));
    }

    let records: Vec<Record> = sections
        .iter()
        .zip(vectors)
        .map(|(s, vector)| Record {
            id: Uuid::new_v4(),
            vector,
            content: s.content.clone(),
            section: s.section.clone(),
        })
        .collect();

    let manifest = Manifest {
        name: collection.to_string(),
        embedding_model: embeddings.model_id().to_string(),
        dimension: embeddings.dimension(),
        count: records.len(),
        created_at: Utc::now(),
    };

    // Build into a temporary sibling, then swap it in. The old store is
    // only removed once the replacement is fully written. The staging name
    // is fixed, so a leftover from an interrupted run is overwritten.
    let staging = staging_path(db_path);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    if let Err(e) = write_staging(&staging, collection, &manifest, &records) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    if db_path.exists() {
        tracing::info!("Removing existing database at {}", db_path.display());
        std::fs::remove_dir_all(db_path)?;
    }
    std::fs::rename(&staging, db_path)?;

    tracing::info!(
        "Wrote {} records to {}/{}",
        records.len(),
        db_path.display(),
        collection
    );

    // Verification pass over the freshly persisted store
    let store = LocalStore::open(db_path)?.with_expected_model(embeddings.model_id());
    let persisted = store.count(collection)?;
    if persisted != sections.len() {
        return Err(MuniError::Store(format!(
            "Verification failed: store has {} records, expected {}",
            persisted,
            sections.len()
        )));
    }

    let query_vector = embeddings.embed(sample_query).await?;
    let sample_results = store.similarity_search(collection, &query_vector, 3)?;

    Ok(RebuildReport {
        count: persisted,
        sample_results,
    })
}

fn staging_path(db_path: &Path) -> PathBuf {
    let name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    db_path.with_file_name(format!(".{name}.rebuild"))
}

fn write_staging(
    staging: &Path,
    collection: &str,
    manifest: &Manifest,
    records: &[Record],
) -> Result<()> {
    let collection_dir = staging.join(collection);
    std::fs::create_dir_all(&collection_dir)?;

    std::fs::write(
        collection_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(manifest)
            .map_err(|e| MuniError::Store(format!("Failed to serialize manifest: {e}")))?,
    )?;
    std::fs::write(
        collection_dir.join(RECORDS_FILE),
        serde_json::to_string(records)
            .map_err(|e| MuniError::Store(format!("Failed to serialize records: {e}")))?,
    )?;

    Ok(())
}

/// Cosine similarity between two vectors; 0.0 when either has no magnitude
/// or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedding stub: maps text length and first byte into
    /// a small vector, counting calls.
    pub(crate) struct FakeEmbedding {
        pub calls: AtomicUsize,
    }

    impl FakeEmbedding {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = text.bytes().next().unwrap_or(0) as f32;
            Ok(vec![text.len() as f32, first, 1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "fake-embed-v1"
        }
    }

    fn sections() -> Vec<Section> {
        vec![
            Section::new("12.04.010", "No fences over 6 feet."),
            Section::new("12.04.020", "Permits required."),
            Section::chunk("Unlabeled trailing chunk."),
        ]
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_open_missing_store_is_missing_input() {
        let err = LocalStore::open("no/such/dir").unwrap_err();
        assert!(matches!(err, MuniError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_rebuild_persists_all_sections() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        let report = rebuild_index(&sections(), &embeddings, &db, "sections", "fences")
            .await
            .unwrap();

        assert_eq!(report.count, 3);
        assert!(!report.sample_results.is_empty());

        let store = LocalStore::open(&db).unwrap();
        assert_eq!(store.count("sections").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_twice_never_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        rebuild_index(&sections(), &embeddings, &db, "sections", "q")
            .await
            .unwrap();
        rebuild_index(&sections(), &embeddings, &db, "sections", "q")
            .await
            .unwrap();

        let store = LocalStore::open(&db).unwrap();
        assert_eq!(store.count("sections").unwrap(), 3);
        assert_eq!(store.list_collections().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_leftover_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        // Leftover from an interrupted earlier rebuild
        let stale = staging_path(&db);
        std::fs::create_dir_all(stale.join("sections")).unwrap();
        std::fs::write(stale.join("sections").join(RECORDS_FILE), "garbage").unwrap();

        let report = rebuild_index(&sections(), &embeddings, &db, "sections", "fences")
            .await
            .unwrap();

        assert_eq!(report.count, 3);
        assert!(!stale.exists());
        let store = LocalStore::open(&db).unwrap();
        assert_eq!(store.count("sections").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_rebuild_leaves_no_staging_dir() {
        struct WrongCountEmbedding;

        #[async_trait]
        impl EmbeddingClient for WrongCountEmbedding {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0, 0.0])
            }

            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                // One vector short, so the rebuild fails after validation
                Ok(vec![vec![1.0, 0.0, 0.0]])
            }

            fn dimension(&self) -> usize {
                3
            }

            fn model_id(&self) -> &str {
                "wrong-count"
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");

        let err = rebuild_index(&sections(), &WrongCountEmbedding, &db, "sections", "q")
            .await
            .unwrap_err();
        assert!(matches!(err, MuniError::Embedding(_)));
        assert!(!staging_path(&db).exists());
        assert!(!db.exists());
    }

    #[tokio::test]
    async fn test_empty_collection_search_returns_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        rebuild_index(&[], &embeddings, &db, "sections", "anything")
            .await
            .unwrap();

        let store = LocalStore::open(&db).unwrap();
        let results = store
            .similarity_search("sections", &[1.0, 2.0, 3.0], 3)
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_and_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        rebuild_index(&sections(), &embeddings, &db, "sections", "q")
            .await
            .unwrap();

        let store = LocalStore::open(&db).unwrap();
        // Query with the exact fake embedding of the first section
        let query = embeddings.embed("No fences over 6 feet.").await.unwrap();
        let results = store.similarity_search("sections", &query, 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].section.content, "No fences over 6 feet.");
        assert_eq!(results[0].section.section.as_deref(), Some("12.04.010"));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_model_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        rebuild_index(&sections(), &embeddings, &db, "sections", "q")
            .await
            .unwrap();

        let store = LocalStore::open(&db)
            .unwrap()
            .with_expected_model("some-other-model");
        let err = store.count("sections").unwrap_err();
        assert!(matches!(err, MuniError::Store(_)));

        // The matching model passes
        let store = LocalStore::open(&db)
            .unwrap()
            .with_expected_model("fake-embed-v1");
        assert_eq!(store.count("sections").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_collections_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store");
        let embeddings = FakeEmbedding::new();

        rebuild_index(&sections(), &embeddings, &db, "sections", "q")
            .await
            .unwrap();

        let store = LocalStore::open(&db).unwrap();
        let collections = store.list_collections().unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].name, "sections");
        assert_eq!(collections[0].count, 3);
    }
}
