use serde::{Deserialize, Serialize};

/// Top-level engine configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub ingestion: IngestionConfig,
    pub retrieval: RetrievalConfig,
    pub rag: RagConfig,
    pub cache: CacheConfig,
}

/// Ingestion pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Embedding batch size for one provider call.
    pub embedding_batch_size: usize,
    /// Store write sub-batch size.
    pub store_batch_size: usize,
    /// Documents processed concurrently in one batch ingest.
    pub ingest_batch_size: usize,
    /// Reject re-ingestion of content with an already-indexed checksum.
    pub deduplicate: bool,
    /// Maximum accepted content size in bytes.
    pub max_content_bytes: usize,
    /// Key terms extracted per document.
    pub max_key_terms: usize,
    /// Default target collection.
    pub default_collection: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            embedding_batch_size: 32,
            store_batch_size: 100,
            ingest_batch_size: 5,
            deduplicate: true,
            max_content_bytes: 10 * 1024 * 1024,
            max_key_terms: 10,
            default_collection: "credit_documents".to_string(),
        }
    }
}

/// Retrieval engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub default_threshold: f64,
    /// Hybrid is the default strategy when enabled.
    pub hybrid_enabled: bool,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    /// Expand queries with synonyms and related concepts.
    pub query_expansion: bool,
    /// Synonyms/related terms appended per query at most.
    pub max_expansion_terms: usize,
    /// Candidates kept after reranking.
    pub rerank_max_results: usize,
    /// Highlighted snippets attached per result at most.
    pub max_highlights: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            default_threshold: 0.0,
            hybrid_enabled: true,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            query_expansion: false,
            max_expansion_terms: 4,
            rerank_max_results: 10,
            max_highlights: 3,
        }
    }
}

/// RAG orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Context budget in characters; lowest-ranked sources are dropped
    /// first when the assembled context would exceed it.
    pub max_context_chars: usize,
    pub conversation_memory: bool,
    pub max_conversation_turns: usize,
    pub citations: bool,
    pub follow_up_questions: bool,
    /// Generation model name passed to the provider.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 8_000,
            conversation_memory: true,
            max_conversation_turns: 10,
            citations: true,
            follow_up_questions: false,
            model: "granite-3-8b-instruct".to_string(),
            temperature: 0.3,
            max_tokens: 1_024,
        }
    }
}

/// Bounds for the retrieval and RAG response caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            ttl_secs: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_hybrid_with_bounded_caches() {
        let config = EngineConfig::default();
        assert!(config.retrieval.hybrid_enabled);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < f64::EPSILON);
        assert!((config.retrieval.keyword_weight - 0.3).abs() < f64::EPSILON);
        assert!(config.cache.capacity > 0);
        assert!(config.cache.ttl_secs > 0);
        assert_eq!(config.ingestion.default_collection, "credit_documents");
    }

    #[test]
    fn overlap_is_smaller_than_chunk_size() {
        let config = IngestionConfig::default();
        assert!(config.chunk_overlap < config.chunk_size);
    }
}
