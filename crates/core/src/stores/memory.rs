//! In-memory [`VectorStore`] for development and testing.
//!
//! Brute-force cosine similarity over stored vectors; keyword queries
//! are scored by naive token overlap. Same contract as the remote
//! backends.

use crate::embeddings::cosine_similarity;
use crate::error::{EngineError, Result};
use crate::models::{DocumentChunk, RetrievalResult, SearchFilters, SearchRequest};
use crate::stores::{CollectionStats, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

struct Collection {
    dimension: usize,
    chunks: HashMap<String, DocumentChunk>,
}

#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filters(chunk: &DocumentChunk, filters: &SearchFilters) -> bool {
    if filters.is_empty() {
        return true;
    }
    let metadata = match serde_json::to_value(&chunk.metadata) {
        Ok(value) => value,
        Err(_) => return false,
    };

    filters.iter().all(|(key, expected)| {
        if key == "document_id" {
            return expected.as_str() == Some(chunk.document_id.as_str());
        }
        match metadata.get(key) {
            Some(serde_json::Value::Array(items)) => items.contains(expected),
            Some(actual) => actual == expected,
            None => false,
        }
    })
}

fn keyword_overlap_score(content: &str, query_text: &str) -> f64 {
    let lowered = content.to_lowercase();
    let query_lowered = query_text.to_lowercase();
    let terms: Vec<&str> = query_lowered.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|term| lowered.contains(**term)).count();
    matched as f64 / terms.len() as f64
}

fn to_result(chunk: &DocumentChunk, score: f64) -> RetrievalResult {
    RetrievalResult {
        chunk_id: chunk.chunk_id.clone(),
        document_id: chunk.document_id.clone(),
        chunk_index: chunk.chunk_index,
        content: chunk.content.clone(),
        score,
        metadata: chunk.metadata.clone(),
        highlights: Vec::new(),
        relevance: None,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections.entry(name.to_string()).or_insert(Collection {
            dimension,
            chunks: HashMap::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::UnknownCollection(name.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().unwrap();
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn add_documents(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;
        for chunk in chunks {
            target.chunks.insert(chunk.chunk_id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn update_document(&self, collection: &str, chunk: &DocumentChunk) -> Result<()> {
        self.add_documents(collection, std::slice::from_ref(chunk))
            .await
    }

    async fn delete_document(&self, collection: &str, chunk_id: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;
        target.chunks.remove(chunk_id);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievalResult>> {
        let collections = self.collections.read().unwrap();
        let target = collections
            .get(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;

        let mut hits: Vec<RetrievalResult> = target
            .chunks
            .values()
            .filter(|chunk| matches_filters(chunk, &request.filters))
            .filter_map(|chunk| {
                let score = if let Some(embedding) = &request.embedding {
                    cosine_similarity(embedding, &chunk.embedding) as f64
                } else if let Some(query_text) = &request.query_text {
                    keyword_overlap_score(&chunk.content, query_text)
                } else {
                    // Pure filter lookup; every match counts equally.
                    1.0
                };
                match request.threshold {
                    Some(threshold) if score < threshold => None,
                    _ => Some(to_result(chunk, score)),
                }
            })
            .collect();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(request.top_k);
        Ok(hits)
    }

    async fn get_document(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<DocumentChunk>> {
        let collections = self.collections.read().unwrap();
        let target = collections
            .get(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;
        Ok(target.chunks.get(chunk_id).cloned())
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let collections = self.collections.read().unwrap();
        let target = collections
            .get(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;
        Ok(CollectionStats {
            document_count: target.chunks.len(),
            dimension: target.dimension,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn cleanup(&self) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, DocumentType, StructureSignals};
    use chrono::Utc;

    fn chunk(id: &str, document_id: &str, content: &str, embedding: Vec<f32>) -> DocumentChunk {
        let now = Utc::now();
        DocumentChunk {
            chunk_id: id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: content.len(),
            content: content.to_string(),
            metadata: DocumentMetadata {
                document_id: document_id.to_string(),
                title: "Test".to_string(),
                doc_type: DocumentType::Policy,
                source: "unit-test".to_string(),
                author: None,
                version: None,
                tags: vec!["lending".to_string()],
                category: None,
                language: "en".to_string(),
                size_bytes: content.len(),
                checksum: format!("sum-{document_id}"),
                structure: StructureSignals::default(),
                key_terms: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn add_to_unknown_collection_fails() {
        let store = MemoryVectorStore::new();
        let result = store
            .add_documents("missing", &[chunk("c1", "d1", "text", vec![1.0])])
            .await;
        assert!(matches!(result, Err(EngineError::UnknownCollection(_))));
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity_and_truncates() {
        let store = MemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        let chunks = vec![
            chunk("c1", "d1", "one", vec![1.0, 0.0]),
            chunk("c2", "d2", "two", vec![0.9, 0.1]),
            chunk("c3", "d3", "three", vec![0.0, 1.0]),
            chunk("c4", "d4", "four", vec![0.8, 0.2]),
            chunk("c5", "d5", "five", vec![0.7, 0.3]),
        ];
        store.add_documents("docs", &chunks).await.unwrap();

        let hits = store
            .search(
                "docs",
                &SearchRequest {
                    embedding: Some(vec![1.0, 0.0]),
                    top_k: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn threshold_drops_weak_matches() {
        let store = MemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add_documents(
                "docs",
                &[
                    chunk("c1", "d1", "one", vec![1.0, 0.0]),
                    chunk("c2", "d2", "two", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "docs",
                &SearchRequest {
                    embedding: Some(vec![1.0, 0.0]),
                    top_k: 10,
                    threshold: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn metadata_filters_restrict_results() {
        let store = MemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add_documents(
                "docs",
                &[
                    chunk("c1", "d1", "one", vec![1.0, 0.0]),
                    chunk("c2", "d2", "two", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let mut filters = SearchFilters::new();
        filters.insert("checksum".to_string(), serde_json::json!("sum-d2"));
        let hits = store
            .search(
                "docs",
                &SearchRequest {
                    top_k: 10,
                    filters,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d2");
    }

    #[tokio::test]
    async fn keyword_search_scores_token_overlap() {
        let store = MemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add_documents(
                "docs",
                &[
                    chunk("c1", "d1", "minimum credit score is 650", vec![]),
                    chunk("c2", "d2", "hydraulic pump maintenance", vec![]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "docs",
                &SearchRequest {
                    query_text: Some("credit score".to_string()),
                    top_k: 10,
                    threshold: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }
}
