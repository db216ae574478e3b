//! Pluggable vector store backends behind one capability interface.

pub mod chroma;
pub mod memory;

use crate::error::Result;
use crate::models::{DocumentChunk, RetrievalResult, SearchRequest};
use async_trait::async_trait;

pub use chroma::ChromaStore;
pub use memory::MemoryVectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    pub document_count: usize,
    pub dimension: usize,
}

/// Capability interface over a backing vector store. Implementations may
/// be a managed service, a local ANN index, or an in-memory linear scan;
/// the contract is identical across all.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Upsert-like append. Fails with an unknown-collection error when
    /// the target collection does not exist.
    async fn add_documents(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()>;

    async fn update_document(&self, collection: &str, chunk: &DocumentChunk) -> Result<()>;

    async fn delete_document(&self, collection: &str, chunk_id: &str) -> Result<()>;

    /// Results ordered by descending score, filtered to scores >=
    /// threshold when supplied, truncated to `top_k`.
    async fn search(&self, collection: &str, request: &SearchRequest)
        -> Result<Vec<RetrievalResult>>;

    async fn get_document(&self, collection: &str, chunk_id: &str)
        -> Result<Option<DocumentChunk>>;

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats>;

    async fn health_check(&self) -> bool;

    /// Release backend resources; a no-op for stateless backends.
    async fn cleanup(&self) -> Result<()>;
}
