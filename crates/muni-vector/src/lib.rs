//! Muni Vector - Embedding generation and the persistent section store
//!
//! Ingestion embeds every parsed section and rebuilds the store directory
//! from scratch; querying runs brute-force cosine search over the
//! persisted records. The store manifest pins the embedding model so
//! ingestion-time and query-time embedding spaces cannot silently diverge.

pub mod embedding;
pub mod store;

pub use embedding::{create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiEmbedding};
pub use store::{
    rebuild_index, CollectionInfo, LocalStore, Manifest, RebuildReport, SectionStore,
};
