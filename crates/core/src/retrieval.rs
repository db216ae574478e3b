//! Multi-strategy retrieval over a [`VectorStore`]: vector, keyword,
//! hybrid score fusion, semantic, and two-hop contextual refinement,
//! with optional query expansion and reranking.

use crate::analysis::{extract_keywords, split_sentences};
use crate::cache::{EngineCaches, RetrievalCacheKey};
use crate::config::RetrievalConfig;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::models::{
    RerankMode, RetrievalOptions, RetrievalResponse, RetrievalResult, RetrievalStrategy,
    SearchRequest,
};
use crate::stores::VectorStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Hybrid sub-searches fetch more candidates than requested so fusion
/// has something to merge.
const HYBRID_INFLATION: f64 = 1.5;
/// Results fed into the pseudo-context on the contextual second hop.
const CONTEXT_SEED_RESULTS: usize = 5;

const SYNONYMS: [(&str, &[&str]); 6] = [
    ("credit", &["loan", "lending"]),
    ("score", &["rating", "scorecard"]),
    ("income", &["earnings", "salary"]),
    ("risk", &["exposure"]),
    ("default", &["delinquency", "arrears"]),
    ("policy", &["guideline", "rule"]),
];

const RELATED_CONCEPTS: [(&str, &[&str]); 4] = [
    ("mortgage", &["collateral", "property"]),
    ("applicant", &["borrower"]),
    ("compliance", &["regulation", "audit"]),
    ("underwriting", &["approval", "review"]),
];

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
    default_collection: String,
    caches: Option<Arc<EngineCaches>>,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
        default_collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            default_collection: default_collection.into(),
            caches: None,
        }
    }

    pub fn with_caches(mut self, caches: Arc<EngineCaches>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Both the embedder and the store must be reachable.
    pub async fn health_check(&self) -> bool {
        self.embedder.health_check().await && self.store.health_check().await
    }

    pub fn default_strategy(&self) -> RetrievalStrategy {
        if self.config.hybrid_enabled {
            RetrievalStrategy::Hybrid
        } else {
            RetrievalStrategy::VectorOnly
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResponse> {
        if query.trim().is_empty() {
            return Err(EngineError::validation("query is empty"));
        }

        let collection = options
            .collection
            .clone()
            .unwrap_or_else(|| self.default_collection.clone());
        let top_k = options.top_k.unwrap_or(self.config.default_top_k).max(1);
        let threshold = options.threshold.or(if self.config.default_threshold > 0.0 {
            Some(self.config.default_threshold)
        } else {
            None
        });
        let strategy = options.strategy.unwrap_or_else(|| self.default_strategy());
        let expand = options.expand_query.unwrap_or(self.config.query_expansion);

        let cache_key = RetrievalCacheKey {
            query: query.to_string(),
            collection: collection.clone(),
            top_k,
            threshold_bits: threshold.map(f64::to_bits),
            strategy,
            rerank: options.rerank,
            expanded: expand,
            filters: serde_json::to_string(&options.filters)?,
        };
        if let Some(caches) = self.caches.as_ref().filter(|caches| caches.enabled()) {
            if let Some(cached) = caches.retrieval.get(&cache_key) {
                tracing::debug!(%collection, query, "retrieval cache hit");
                return Ok(cached);
            }
        }

        let expanded_query = if expand {
            expand_query(query, self.config.max_expansion_terms)
        } else {
            None
        };
        let effective_query = expanded_query.as_deref().unwrap_or(query);

        tracing::debug!(%collection, strategy = strategy.as_str(), top_k, "retrieving");

        let mut results = match strategy {
            RetrievalStrategy::VectorOnly => {
                self.vector_search(effective_query, &collection, top_k, threshold, options)
                    .await?
            }
            RetrievalStrategy::SemanticSearch => {
                // Semantic search always embeds the user's own words.
                self.vector_search(query, &collection, top_k, threshold, options)
                    .await?
            }
            RetrievalStrategy::KeywordOnly => {
                self.keyword_search(effective_query, &collection, top_k, threshold, options)
                    .await?
            }
            RetrievalStrategy::Hybrid => {
                self.hybrid_search(effective_query, &collection, top_k, threshold, options)
                    .await?
            }
            RetrievalStrategy::Contextual => {
                self.contextual_search(effective_query, &collection, top_k, threshold, options)
                    .await?
            }
        };

        if let Some(mode) = options.rerank {
            results = self.rerank(effective_query, results, mode).await?;
        }

        dedupe_results(&mut results);
        attach_highlights(&mut results, query, self.config.max_highlights);
        results.truncate(top_k);

        let response = RetrievalResponse {
            results,
            strategy,
            original_query: query.to_string(),
            expanded_query,
            collection,
        };

        if let Some(caches) = self.caches.as_ref().filter(|caches| caches.enabled()) {
            caches.retrieval.insert(cache_key, response.clone());
        }
        Ok(response)
    }

    /// Independent queries fan out concurrently; one failure never
    /// aborts its siblings.
    pub async fn multi_query(
        &self,
        queries: &[String],
        options: &RetrievalOptions,
    ) -> Vec<Result<RetrievalResponse>> {
        let futures = queries.iter().map(|query| self.retrieve(query, options));
        futures::future::join_all(futures).await
    }

    /// Retrieval with caller-supplied context strings appended to the
    /// query before embedding.
    pub async fn contextual_retrieval(
        &self,
        query: &str,
        contexts: &[String],
        options: &RetrievalOptions,
    ) -> Result<RetrievalResponse> {
        let augmented = if contexts.is_empty() {
            query.to_string()
        } else {
            format!("{query}\n\n{}", contexts.join("\n"))
        };
        let mut options = options.clone();
        options.strategy = Some(RetrievalStrategy::VectorOnly);
        let mut response = self.retrieve(&augmented, &options).await?;
        response.original_query = query.to_string();
        Ok(response)
    }

    /// Find chunks similar to an existing document, using the document's
    /// own content as the query and excluding the document itself.
    pub async fn similarity_search(
        &self,
        document_id: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResponse> {
        let collection = options
            .collection
            .clone()
            .unwrap_or_else(|| self.default_collection.clone());
        let top_k = options.top_k.unwrap_or(self.config.default_top_k).max(1);

        let mut filters = crate::models::SearchFilters::new();
        filters.insert("document_id".to_string(), serde_json::json!(document_id));
        let own_chunks = self
            .store
            .search(
                &collection,
                &SearchRequest {
                    top_k: 1,
                    filters,
                    ..Default::default()
                },
            )
            .await?;
        let seed = own_chunks
            .first()
            .ok_or_else(|| EngineError::NotFound(format!("document {document_id}")))?;

        let mut inner = options.clone();
        inner.strategy = Some(RetrievalStrategy::VectorOnly);
        // Over-fetch so self-hits can be dropped and top_k still filled.
        inner.top_k = Some(top_k * 2);
        let mut response = self.retrieve(&seed.content.clone(), &inner).await?;
        response
            .results
            .retain(|result| result.document_id != document_id);
        response.results.truncate(top_k);
        response.original_query = format!("similar-to:{document_id}");
        Ok(response)
    }

    async fn vector_search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        threshold: Option<f64>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let embedding = self.embedder.embed_one(query).await?;
        self.store
            .search(
                collection,
                &SearchRequest {
                    embedding: Some(embedding),
                    top_k,
                    threshold,
                    filters: options.filters.clone(),
                    ..Default::default()
                },
            )
            .await
    }

    async fn keyword_search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        threshold: Option<f64>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let keywords = extract_keywords(query);
        let query_text = if keywords.is_empty() {
            query.to_string()
        } else {
            keywords.join(" ")
        };
        self.store
            .search(
                collection,
                &SearchRequest {
                    query_text: Some(query_text),
                    top_k,
                    threshold,
                    filters: options.filters.clone(),
                    ..Default::default()
                },
            )
            .await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        threshold: Option<f64>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let inflated = ((top_k as f64) * HYBRID_INFLATION).ceil() as usize;

        // Both sub-searches complete (or fail) before fusion starts.
        let (vector_hits, keyword_hits) = tokio::try_join!(
            self.vector_search(query, collection, inflated, threshold, options),
            self.keyword_search(query, collection, inflated, threshold, options)
        )?;

        Ok(merge_hybrid(
            vector_hits,
            keyword_hits,
            self.config.semantic_weight,
            self.config.keyword_weight,
            top_k,
        ))
    }

    /// Two-hop refinement: an oversized first pass supplies pseudo-
    /// context, and a context-augmented re-embedding runs the second.
    async fn contextual_search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        threshold: Option<f64>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let first_pass = self
            .vector_search(query, collection, top_k * 3, threshold, options)
            .await?;
        if first_pass.is_empty() {
            return Ok(first_pass);
        }

        let pseudo_context: Vec<&str> = first_pass
            .iter()
            .take(CONTEXT_SEED_RESULTS)
            .map(|result| result.content.as_str())
            .collect();
        let augmented = format!("{query}\n\n{}", pseudo_context.join("\n"));
        self.vector_search(&augmented, collection, top_k, threshold, options)
            .await
    }

    async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievalResult>,
        mode: RerankMode,
    ) -> Result<Vec<RetrievalResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let mut reranked = match mode {
            RerankMode::Semantic => self.semantic_rerank(query, results).await?,
            RerankMode::CrossEncoder => {
                // No dedicated cross-encoder model is wired in; fall back
                // to the semantic pass.
                tracing::debug!("cross-encoder unavailable, using semantic rerank");
                self.semantic_rerank(query, results).await?
            }
            RerankMode::Custom => custom_rerank(query, results),
        };

        reranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        reranked.truncate(self.config.rerank_max_results);
        Ok(reranked)
    }

    /// Average each candidate's original score with a fresh similarity
    /// between the query and the candidate's own content.
    async fn semantic_rerank(
        &self,
        query: &str,
        mut results: Vec<RetrievalResult>,
    ) -> Result<Vec<RetrievalResult>> {
        let query_vector = self.embedder.embed_one(query).await?;
        let texts: Vec<String> = results.iter().map(|result| result.content.clone()).collect();
        let batch = self.embedder.embed(&texts).await?;

        for (result, vector) in results.iter_mut().zip(batch.vectors) {
            let similarity = cosine_similarity(&query_vector, &vector) as f64;
            result.score = (result.score + similarity) / 2.0;
            result.relevance = Some(format!("semantic rerank similarity {similarity:.3}"));
        }
        Ok(results)
    }
}

/// Weighted-sum fusion over both candidate sets, keyed by chunk id. A
/// hit present in only one set contributes only that set's weighted
/// score.
fn merge_hybrid(
    vector_hits: Vec<RetrievalResult>,
    keyword_hits: Vec<RetrievalResult>,
    semantic_weight: f64,
    keyword_weight: f64,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let mut merged: HashMap<String, RetrievalResult> = HashMap::new();

    for hit in vector_hits {
        let weighted = hit.score * semantic_weight;
        let entry = merged.entry(hit.chunk_id.clone()).or_insert_with(|| {
            let mut seed = hit.clone();
            seed.score = 0.0;
            seed
        });
        entry.score += weighted;
    }
    for hit in keyword_hits {
        let weighted = hit.score * keyword_weight;
        let entry = merged.entry(hit.chunk_id.clone()).or_insert_with(|| {
            let mut seed = hit.clone();
            seed.score = 0.0;
            seed
        });
        entry.score += weighted;
    }

    let mut fused: Vec<RetrievalResult> = merged.into_values().collect();
    fused.sort_by(|left, right| right.score.total_cmp(&left.score));
    fused.truncate(top_k);
    fused
}

/// Multiplicative boosts for document type, recency within 30 days, and
/// query-term density in the content.
fn custom_rerank(query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let keywords = extract_keywords(query);
    let now = Utc::now();

    for result in &mut results {
        let mut boost = match result.metadata.doc_type {
            crate::models::DocumentType::Policy => 1.2,
            crate::models::DocumentType::Regulation => 1.15,
            crate::models::DocumentType::Guideline => 1.1,
            _ => 1.0,
        };

        let age_days = (now - result.metadata.updated_at).num_days();
        if (0..=30).contains(&age_days) {
            boost *= 1.1;
        }

        let lowered = result.content.to_lowercase();
        let word_count = lowered.split_whitespace().count().max(1);
        let term_hits: usize = keywords
            .iter()
            .map(|keyword| lowered.matches(keyword.as_str()).count())
            .sum();
        let density = (term_hits as f64 / word_count as f64).min(0.3);
        boost *= 1.0 + density;

        result.score *= boost;
        result.relevance = Some(format!("custom rerank boost {boost:.3}"));
    }
    results
}

fn expand_query(query: &str, max_terms: usize) -> Option<String> {
    let keywords = extract_keywords(query);
    let mut additions: Vec<&str> = Vec::new();

    for keyword in &keywords {
        for (term, synonyms) in SYNONYMS {
            if term == keyword {
                additions.extend(synonyms.iter().copied());
            }
        }
        for (term, related) in RELATED_CONCEPTS {
            if term == keyword {
                additions.extend(related.iter().copied());
            }
        }
    }

    additions.retain(|term| !keywords.iter().any(|keyword| keyword == term));
    additions.dedup();
    additions.truncate(max_terms);

    if additions.is_empty() {
        None
    } else {
        Some(format!("{query} {}", additions.join(" ")))
    }
}

/// Drop repeated (document id, chunk index) pairs, keeping the first
/// (highest-ranked) occurrence.
fn dedupe_results(results: &mut Vec<RetrievalResult>) {
    let mut seen = std::collections::HashSet::new();
    results.retain(|result| seen.insert((result.document_id.clone(), result.chunk_index)));
}

/// Attach up to `limit` sentence-level snippets containing a query
/// keyword.
fn attach_highlights(results: &mut [RetrievalResult], query: &str, limit: usize) {
    let keywords = extract_keywords(query);
    if keywords.is_empty() || limit == 0 {
        return;
    }
    for result in results.iter_mut() {
        let mut highlights = Vec::new();
        for sentence in split_sentences(&result.content) {
            let lowered = sentence.to_lowercase();
            if keywords.iter().any(|keyword| lowered.contains(keyword.as_str())) {
                highlights.push(sentence);
                if highlights.len() >= limit {
                    break;
                }
            }
        }
        result.highlights = highlights;
    }
}
