//! Document ingestion pipeline: validate, deduplicate, chunk, embed,
//! store, index. Each call walks the fixed stage sequence and publishes
//! every transition through the [`ProgressTracker`].

use crate::analysis::{
    checksum, derive_document_id, detect_language, key_terms, structure_signals,
};
use crate::cache::EngineCaches;
use crate::chunking::chunk_text;
use crate::config::IngestionConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::models::{
    DocumentChunk, DocumentInput, DocumentMetadata, IngestionResult, IngestionStatus, RagDomain,
    SearchFilters, SearchRequest,
};
use crate::progress::{IngestionStage, ProgressTracker};
use crate::stores::VectorStore;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Page size used when enumerating a document's chunks for removal.
const REMOVAL_PAGE_SIZE: usize = 1_000;

pub fn index_collection(collection: &str) -> String {
    format!("{collection}_index")
}

pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: IngestionConfig,
    progress: Arc<ProgressTracker>,
    caches: Option<Arc<EngineCaches>>,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            progress: Arc::new(ProgressTracker::default()),
            caches: None,
        }
    }

    /// Wire the shared caches so writes invalidate stale responses.
    pub fn with_caches(mut self, caches: Arc<EngineCaches>) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    fn collection_or_default<'a>(&'a self, collection: Option<&'a str>) -> &'a str {
        collection.unwrap_or(&self.config.default_collection)
    }

    /// Create the default collection and every domain collection, each
    /// with its index sibling. Idempotent.
    pub async fn ensure_collections(&self) -> Result<Vec<String>> {
        let dimension = self.embedder.model_info().dimensions;
        let mut names = vec![self.config.default_collection.clone()];
        names.extend(
            RagDomain::ALL
                .iter()
                .map(|domain| domain.collection().to_string()),
        );

        for name in &names {
            self.store.create_collection(name, dimension).await?;
            self.store
                .create_collection(&index_collection(name), dimension)
                .await?;
        }
        tracing::info!(count = names.len(), "collections ensured");
        Ok(names)
    }

    pub async fn ingest(
        &self,
        content: &str,
        input: DocumentInput,
        collection: Option<&str>,
    ) -> Result<IngestionResult> {
        let collection = self.collection_or_default(collection).to_string();
        let document_id = input
            .id
            .clone()
            .unwrap_or_else(|| derive_document_id(content, &input.title, &input.source));

        match self.run(content, input, &collection, &document_id).await {
            Ok(result) => {
                self.progress
                    .transition(&document_id, IngestionStage::Completed, "ingestion complete");
                Ok(result)
            }
            Err(error) => {
                self.progress.fail(&document_id, error.to_string());
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        content: &str,
        input: DocumentInput,
        collection: &str,
        document_id: &str,
    ) -> Result<IngestionResult> {
        self.progress
            .transition(document_id, IngestionStage::Validation, "validating document");
        let doc_type = validate(content, &input, &self.config)?;

        self.progress
            .transition(document_id, IngestionStage::Parsing, "analyzing content");
        let now = Utc::now();
        let metadata = DocumentMetadata {
            document_id: document_id.to_string(),
            title: input.title,
            doc_type,
            source: input.source,
            author: input.author,
            version: input.version,
            tags: input.tags,
            category: input.category,
            language: detect_language(content),
            size_bytes: content.len(),
            checksum: checksum(content),
            structure: structure_signals(content),
            key_terms: key_terms(content, self.config.max_key_terms),
            created_at: now,
            updated_at: now,
        };

        let dimension = self.embedder.model_info().dimensions;
        self.store.create_collection(collection, dimension).await?;
        self.store
            .create_collection(&index_collection(collection), dimension)
            .await?;

        if self.config.deduplicate {
            let mut filters = SearchFilters::new();
            filters.insert("checksum".to_string(), json!(metadata.checksum));
            let duplicates = self
                .store
                .search(
                    collection,
                    &SearchRequest {
                        top_k: 1,
                        filters,
                        ..Default::default()
                    },
                )
                .await?;
            if !duplicates.is_empty() {
                return Err(EngineError::conflict(format!(
                    "content with checksum {} already indexed in {collection}",
                    metadata.checksum
                )));
            }
        }

        self.progress
            .transition(document_id, IngestionStage::Chunking, "chunking content");
        let pieces = chunk_text(content, self.config.chunk_size, self.config.chunk_overlap);
        if pieces.is_empty() {
            return Err(EngineError::validation("content produced no chunks"));
        }

        let mut chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| DocumentChunk {
                chunk_id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: index,
                start_offset: piece.start_offset,
                end_offset: piece.end_offset,
                content: piece.content,
                metadata: metadata.clone(),
                embedding: Vec::new(),
            })
            .collect();

        self.progress.transition(
            document_id,
            IngestionStage::Embedding,
            format!("embedding {} chunks", chunks.len()),
        );
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for sub_batch in texts.chunks(self.config.embedding_batch_size.max(1)) {
            let batch = self.embedder.embed(sub_batch).await?;
            vectors.extend(batch.vectors);
        }
        if vectors.len() != chunks.len() {
            return Err(EngineError::embedding(format!(
                "expected {} vectors, provider returned {}",
                chunks.len(),
                vectors.len()
            )));
        }
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }

        self.progress
            .transition(document_id, IngestionStage::Storage, "writing chunks");
        for sub_batch in chunks.chunks(self.config.store_batch_size.max(1)) {
            self.store.add_documents(collection, sub_batch).await?;
        }

        self.progress
            .transition(document_id, IngestionStage::Indexing, "writing document index");
        let index_record = DocumentChunk {
            chunk_id: document_id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: 0,
            content: String::new(),
            metadata: metadata.clone(),
            embedding: Vec::new(),
        };
        self.store
            .add_documents(&index_collection(collection), &[index_record])
            .await?;

        if let Some(caches) = &self.caches {
            caches.invalidate_collection(collection);
        }

        tracing::info!(
            document_id,
            collection,
            chunk_count = chunks.len(),
            "document ingested"
        );

        Ok(IngestionResult {
            document_id: document_id.to_string(),
            collection: collection.to_string(),
            chunk_count: chunks.len(),
            status: IngestionStatus::Success,
        })
    }

    /// Ingest many documents with per-document isolation: one failure is
    /// captured as a failed result and never aborts its siblings.
    pub async fn ingest_batch(
        &self,
        documents: Vec<(String, DocumentInput)>,
        collection: Option<&str>,
    ) -> Vec<IngestionResult> {
        let collection = self.collection_or_default(collection).to_string();
        let mut results = Vec::with_capacity(documents.len());

        for window in documents.chunks(self.config.ingest_batch_size.max(1)) {
            let futures = window.iter().map(|(content, input)| {
                let collection = collection.clone();
                async move {
                    let document_id = input.id.clone().unwrap_or_else(|| {
                        derive_document_id(content, &input.title, &input.source)
                    });
                    match self.ingest(content, input.clone(), Some(&collection)).await {
                        Ok(result) => result,
                        Err(error) => IngestionResult {
                            document_id,
                            collection: collection.clone(),
                            chunk_count: 0,
                            status: IngestionStatus::Failed {
                                error: error.to_string(),
                            },
                        },
                    }
                }
            });
            results.extend(join_all(futures).await);
        }

        results
    }

    /// Delete-then-reingest under the same id; documents are immutable
    /// in the store once indexed.
    pub async fn update_document(
        &self,
        document_id: &str,
        content: &str,
        mut input: DocumentInput,
        collection: Option<&str>,
    ) -> Result<IngestionResult> {
        match self.remove_document(document_id, collection).await {
            Ok(_) | Err(EngineError::NotFound(_)) => {}
            Err(error) => return Err(error),
        }
        input.id = Some(document_id.to_string());
        self.ingest(content, input, collection).await
    }

    /// Enumerate and delete every chunk referencing the document. Not
    /// transactional; a crash mid-removal can leave orphan chunks.
    pub async fn remove_document(
        &self,
        document_id: &str,
        collection: Option<&str>,
    ) -> Result<usize> {
        let collection = self.collection_or_default(collection).to_string();
        let mut filters = SearchFilters::new();
        filters.insert("document_id".to_string(), json!(document_id));

        let mut removed = 0usize;
        loop {
            let page = self
                .store
                .search(
                    &collection,
                    &SearchRequest {
                        top_k: REMOVAL_PAGE_SIZE,
                        filters: filters.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            if page.is_empty() {
                break;
            }
            for hit in &page {
                self.store.delete_document(&collection, &hit.chunk_id).await?;
            }
            removed += page.len();
        }

        let index = index_collection(&collection);
        let had_index_record = match self.store.get_document(&index, document_id).await {
            Ok(Some(_)) => {
                self.store.delete_document(&index, document_id).await?;
                true
            }
            Ok(None) => false,
            Err(EngineError::UnknownCollection(_)) => false,
            Err(error) => return Err(error),
        };

        if removed == 0 && !had_index_record {
            return Err(EngineError::NotFound(format!(
                "document {document_id} in {collection}"
            )));
        }

        if let Some(caches) = &self.caches {
            caches.invalidate_document(&collection, document_id);
        }
        self.progress.clear(document_id);

        tracing::info!(document_id, collection = %collection, removed, "document removed");
        Ok(removed)
    }
}

fn validate(
    content: &str,
    input: &DocumentInput,
    config: &IngestionConfig,
) -> Result<crate::models::DocumentType> {
    if content.trim().is_empty() {
        return Err(EngineError::validation("document content is empty"));
    }
    if content.len() > config.max_content_bytes {
        return Err(EngineError::validation(format!(
            "content size {} exceeds maximum {}",
            content.len(),
            config.max_content_bytes
        )));
    }
    if input.title.trim().is_empty() {
        return Err(EngineError::validation("document has no title"));
    }
    input
        .doc_type
        .ok_or_else(|| EngineError::validation("document has no recognized type"))
}
