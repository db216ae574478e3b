//! Retrieval-augmented generation engine for institutional credit
//! knowledge: document ingestion and chunking, multi-strategy retrieval
//! over pluggable vector stores, and grounded answer orchestration.
//!
//! The crate is organised around three seams:
//!
//! - [`EmbeddingProvider`] turns text into vectors,
//! - [`VectorStore`] persists and searches chunks,
//! - [`GenerationProvider`] turns prompts into answers.
//!
//! [`IngestionPipeline`] writes through those seams, [`RetrievalEngine`]
//! reads through them, and [`RagOrchestrator`] composes both into cited,
//! confidence-scored responses.

pub mod analysis;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod retrieval;
pub mod stores;

pub use cache::{BoundedCache, EngineCaches};
pub use chunking::{chunk_text, ChunkPiece};
pub use config::{CacheConfig, EngineConfig, IngestionConfig, RagConfig, RetrievalConfig};
pub use embeddings::{
    cosine_similarity, EmbeddingBatch, EmbeddingModelInfo, EmbeddingProvider, HashingEmbedder,
};
pub use error::{EngineError, ProviderFault, Result};
pub use generation::{
    ChatMessage, Completion, GenerationParams, GenerationProvider, HttpGenerator, MessageRole,
    StreamChunk,
};
pub use ingest::IngestionPipeline;
pub use models::{
    Citation, ConversationTurn, DocumentChunk, DocumentInput, DocumentMetadata, DocumentType,
    IngestionResult, IngestionStatus, RagDomain, RagQuery, RagResponse, RerankMode,
    ResponseMetadata, RetrievalOptions, RetrievalResponse, RetrievalResult, RetrievalStrategy,
    SearchFilters, SearchRequest, TokenUsage, TurnRole,
};
pub use orchestrator::{EngineHealth, RagOrchestrator};
pub use progress::{IngestionProgress, IngestionStage, ProgressTracker};
pub use retrieval::RetrievalEngine;
pub use stores::{ChromaStore, CollectionStats, MemoryVectorStore, VectorStore};
