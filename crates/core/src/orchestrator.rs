//! RAG orchestration: retrieve, assemble a bounded context, generate a
//! grounded answer, then score, cite, and remember it.

use crate::cache::{EngineCaches, RagCacheKey};
use crate::config::RagConfig;
use crate::error::{EngineError, Result};
use crate::generation::{ChatMessage, GenerationParams, GenerationProvider};
use crate::models::{
    Citation, ConversationTurn, RagDomain, RagQuery, RagResponse, ResponseMetadata,
    RetrievalOptions, RetrievalResult, TurnRole,
};
use crate::retrieval::RetrievalEngine;
use dashmap::DashMap;
use std::sync::Arc;

/// Turns of history folded into the retrieval query as context.
const HISTORY_CONTEXT_TURNS: usize = 2;
const CITATION_EXCERPT_CHARS: usize = 160;

const RISK_KEYWORDS: [&str; 4] = ["risk", "exposure", "default", "delinquency"];

const COMPLIANCE_NOTE: &str = "Note: this answer touches credit risk. Confirm against the \
     current risk assessment guidelines before acting on it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHealth {
    pub retrieval: bool,
    pub generation: bool,
}

impl EngineHealth {
    pub fn is_healthy(&self) -> bool {
        self.retrieval && self.generation
    }
}

pub struct RagOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<dyn GenerationProvider>,
    config: RagConfig,
    default_collection: String,
    conversations: DashMap<String, Vec<ConversationTurn>>,
    caches: Option<Arc<EngineCaches>>,
}

impl RagOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<dyn GenerationProvider>,
        config: RagConfig,
        default_collection: impl Into<String>,
    ) -> Self {
        Self {
            retrieval,
            generator,
            config,
            default_collection: default_collection.into(),
            conversations: DashMap::new(),
            caches: None,
        }
    }

    pub fn with_caches(mut self, caches: Arc<EngineCaches>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Answer a question from the knowledge base. The full path: cache
    /// lookup, history fetch, retrieval, context assembly, generation,
    /// post-processing, memory append, cache write.
    pub async fn query(
        &self,
        query: &RagQuery,
        conversation_id: Option<&str>,
    ) -> Result<RagResponse> {
        if query.question.trim().is_empty() {
            return Err(EngineError::validation("question is empty"));
        }

        let collection = query
            .collection
            .clone()
            .or_else(|| query.domain.map(|domain| domain.collection().to_string()))
            .unwrap_or_else(|| self.default_collection.clone());
        let top_k = query.top_k.unwrap_or(0);

        let cache_key = RagCacheKey {
            query: query.question.clone(),
            collection: collection.clone(),
            top_k,
            threshold_bits: query.threshold.map(f64::to_bits),
            domain: query.domain,
            conversation_id: conversation_id.map(str::to_string),
        };
        if let Some(caches) = self.caches.as_ref().filter(|caches| caches.enabled()) {
            if let Some(cached) = caches.responses.get(&cache_key) {
                tracing::debug!(%collection, "rag cache hit");
                return Ok(cached);
            }
        }

        let history = self.history_for(conversation_id);

        let options = RetrievalOptions {
            collection: Some(collection.clone()),
            top_k: query.top_k,
            threshold: query.threshold,
            strategy: query.strategy,
            filters: query.filters.clone(),
            ..Default::default()
        };

        // Recent user turns disambiguate follow-up questions such as
        // "what about business loans?".
        let history_context: Vec<String> = history
            .iter()
            .rev()
            .filter(|turn| turn.role == TurnRole::User)
            .take(HISTORY_CONTEXT_TURNS)
            .map(|turn| turn.content.clone())
            .collect();

        let retrieved = if history_context.is_empty() {
            self.retrieval.retrieve(&query.question, &options).await
        } else {
            self.retrieval
                .contextual_retrieval(&query.question, &history_context, &options)
                .await
        }
        .map_err(EngineError::during_retrieval)?;

        let (context, sources) = assemble_context(retrieved.results, self.config.max_context_chars);

        let messages = self.build_messages(query, &context, &sources, &history);
        let params = GenerationParams {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let completion = self
            .generator
            .generate(&messages, &params)
            .await
            .map_err(EngineError::during_generation)?;

        let (mut answer, reasoning) = split_reasoning(&completion.text);
        if needs_compliance_note(&query.question, &answer) {
            answer.push_str("\n\n");
            answer.push_str(COMPLIANCE_NOTE);
        }

        let confidence = confidence_score(&sources, !history.is_empty());
        let citations = if self.config.citations {
            build_citations(&sources)
        } else {
            Vec::new()
        };
        let follow_up_questions = if self.config.follow_up_questions {
            follow_ups(query, &sources)
        } else {
            Vec::new()
        };
        let insights = domain_insights(query.domain, &sources);

        let response = RagResponse {
            answer,
            reasoning,
            sources,
            confidence,
            usage: completion.usage,
            citations,
            follow_up_questions,
            insights,
            metadata: ResponseMetadata {
                query: query.question.clone(),
                collection,
                strategy: retrieved.strategy,
                model: self.config.model.clone(),
                conversation_id: conversation_id.map(str::to_string),
                domain: query.domain,
            },
        };

        if let Some(id) = conversation_id.filter(|_| self.config.conversation_memory) {
            self.remember(id, &query.question, &response.answer);
        }
        if let Some(caches) = self.caches.as_ref().filter(|caches| caches.enabled()) {
            caches.responses.insert(cache_key, response.clone());
        }
        Ok(response)
    }

    /// Shorthand for a remembered multi-turn exchange.
    pub async fn conversational_query(
        &self,
        question: &str,
        conversation_id: &str,
    ) -> Result<RagResponse> {
        self.query(&RagQuery::new(question), Some(conversation_id))
            .await
    }

    /// Ask the same question across several domains concurrently. Each
    /// domain succeeds or fails on its own.
    pub async fn multi_domain_query(
        &self,
        question: &str,
        domains: &[RagDomain],
    ) -> Vec<(RagDomain, Result<RagResponse>)> {
        let futures = domains.iter().map(|&domain| async move {
            let mut query = RagQuery::new(question);
            query.domain = Some(domain);
            (domain, self.query(&query, None).await)
        });
        futures::future::join_all(futures).await
    }

    /// Answer a batch of independent questions; responses keep the input
    /// order and one failure never aborts the rest.
    pub async fn batch_query(&self, queries: &[RagQuery]) -> Vec<Result<RagResponse>> {
        let futures = queries.iter().map(|query| self.query(query, None));
        futures::future::join_all(futures).await
    }

    pub fn conversation_history(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn clear_conversation(&self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub async fn health(&self) -> EngineHealth {
        EngineHealth {
            retrieval: self.retrieval.health_check().await,
            generation: self.generator.health_check().await,
        }
    }

    fn history_for(&self, conversation_id: Option<&str>) -> Vec<ConversationTurn> {
        if !self.config.conversation_memory {
            return Vec::new();
        }
        conversation_id
            .and_then(|id| self.conversations.get(id).map(|entry| entry.clone()))
            .unwrap_or_default()
    }

    /// Append both sides of the exchange, keeping the newest
    /// `max_conversation_turns` messages.
    fn remember(&self, conversation_id: &str, question: &str, answer: &str) {
        let cap = self.config.max_conversation_turns.max(2);
        let mut turns = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        turns.push(ConversationTurn::now(TurnRole::User, question));
        turns.push(ConversationTurn::now(TurnRole::Assistant, answer));
        let overflow = turns.len().saturating_sub(cap);
        if overflow > 0 {
            turns.drain(..overflow);
        }
    }

    fn build_messages(
        &self,
        query: &RagQuery,
        context: &str,
        sources: &[RetrievalResult],
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        let preamble = query
            .domain
            .map(|domain| domain.preamble())
            .unwrap_or(RagDomain::KnowledgeBase.preamble());

        let mut system = String::from(preamble);
        system.push_str(
            "\n\nAnswer only from the numbered context excerpts below. \
             Reference excerpts as [1], [2], and so on. If the context \
             does not contain the answer, say so plainly.",
        );
        if sources.is_empty() {
            system.push_str("\n\nNo relevant documents were retrieved.");
        }

        let mut messages = vec![ChatMessage::system(system)];
        for turn in history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content.clone()),
                TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(format!(
            "Context:\n{context}\n\nQuestion: {}",
            query.question
        )));
        messages
    }
}

/// Fold ranked results into a numbered context block, dropping the
/// lowest-ranked results once the character budget is reached.
fn assemble_context(
    results: Vec<RetrievalResult>,
    max_chars: usize,
) -> (String, Vec<RetrievalResult>) {
    let mut context = String::new();
    let mut kept = Vec::new();

    for result in results {
        let block = format!(
            "[{}] ({}) {}\n",
            kept.len() + 1,
            result.metadata.title,
            result.content
        );
        if context.is_empty() && block.len() > max_chars {
            // Even a lone oversized block stays inside the budget.
            let mut end = max_chars;
            while end > 0 && !block.is_char_boundary(end) {
                end -= 1;
            }
            context.push_str(&block[..end]);
            kept.push(result);
            break;
        }
        if !context.is_empty() && context.len() + block.len() > max_chars {
            break;
        }
        context.push_str(&block);
        kept.push(result);
    }
    (context, kept)
}

/// Peel off a trailing `Reasoning:` section the model may emit.
fn split_reasoning(text: &str) -> (String, Option<String>) {
    match text.split_once("\nReasoning:") {
        Some((answer, reasoning)) => (
            answer.trim().to_string(),
            Some(reasoning.trim().to_string()).filter(|r| !r.is_empty()),
        ),
        None => (text.trim().to_string(), None),
    }
}

fn needs_compliance_note(question: &str, answer: &str) -> bool {
    let question = question.to_lowercase();
    let answer = answer.to_lowercase();
    RISK_KEYWORDS.iter().any(|keyword| question.contains(keyword))
        && !answer.contains("risk assessment")
}

/// Heuristic confidence: a 0.5 base, plus retrieval strength, plus a
/// bonus each for conversational grounding and source diversity.
fn confidence_score(sources: &[RetrievalResult], has_history: bool) -> f64 {
    let avg_score = if sources.is_empty() {
        0.0
    } else {
        sources.iter().map(|source| source.score).sum::<f64>() / sources.len() as f64
    };
    let mut confidence = 0.5 + avg_score.clamp(0.0, 1.0) * 0.3;
    if has_history {
        confidence += 0.1;
    }
    let distinct_documents = sources
        .iter()
        .map(|source| source.document_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();
    if distinct_documents > 2 {
        confidence += 0.1;
    }
    confidence.min(0.95)
}

fn build_citations(sources: &[RetrievalResult]) -> Vec<Citation> {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let excerpt: String = source.content.chars().take(CITATION_EXCERPT_CHARS).collect();
            Citation {
                marker: format!("[{}]", index + 1),
                document_id: source.document_id.clone(),
                title: source.metadata.title.clone(),
                excerpt,
            }
        })
        .collect()
}

fn follow_ups(query: &RagQuery, sources: &[RetrievalResult]) -> Vec<String> {
    let mut questions = Vec::new();
    if let Some(source) = sources.first() {
        questions.push(format!(
            "What else does \"{}\" say about this topic?",
            source.metadata.title
        ));
    }
    if query.domain.is_none() && !sources.is_empty() {
        questions.push("Are there related regulations that apply here?".to_string());
    }
    questions
}

/// Lightweight observations about the retrieved evidence, surfaced
/// alongside the answer.
fn domain_insights(domain: Option<RagDomain>, sources: &[RetrievalResult]) -> Vec<String> {
    let mut insights = Vec::new();
    if sources.is_empty() {
        return insights;
    }

    let distinct_documents = sources
        .iter()
        .map(|source| source.document_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();
    if distinct_documents > 1 {
        insights.push(format!(
            "Answer draws on {distinct_documents} distinct documents."
        ));
    }

    if matches!(domain, Some(RagDomain::Regulation) | Some(RagDomain::CreditPolicy)) {
        if let Some(newest) = sources.iter().map(|source| source.metadata.updated_at).max() {
            insights.push(format!(
                "Most recent source update: {}.",
                newest.format("%Y-%m-%d")
            ));
        }
    }
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, EngineConfig, IngestionConfig};
    use crate::embeddings::HashingEmbedder;
    use crate::generation::{Completion, StreamChunk};
    use crate::ingest::IngestionPipeline;
    use crate::models::{DocumentInput, DocumentType, TokenUsage};
    use crate::stores::MemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct ScriptedGenerator {
        answer: String,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _params: &GenerationParams,
        ) -> crate::error::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.answer.clone(),
                finish_reason: "stop".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }

        async fn generate_stream(
            &self,
            messages: &[ChatMessage],
            params: &GenerationParams,
        ) -> crate::error::Result<mpsc::Receiver<crate::error::Result<StreamChunk>>> {
            let completion = self.generate(messages, params).await?;
            let (sender, receiver) = mpsc::channel(2);
            let _ = sender
                .send(Ok(StreamChunk {
                    delta: completion.text,
                    done: false,
                    finish_reason: None,
                    usage: None,
                }))
                .await;
            let _ = sender
                .send(Ok(StreamChunk {
                    delta: String::new(),
                    done: true,
                    finish_reason: Some(completion.finish_reason),
                    usage: Some(completion.usage),
                }))
                .await;
            Ok(receiver)
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    async fn orchestrator_with(
        answer: &str,
    ) -> (RagOrchestrator, Arc<ScriptedGenerator>) {
        let config = EngineConfig::default();
        let embedder = Arc::new(HashingEmbedder::with_dimensions(64));
        let store = Arc::new(MemoryVectorStore::new());
        let caches = Arc::new(EngineCaches::new(&CacheConfig::default()));

        let pipeline = IngestionPipeline::new(
            embedder.clone(),
            store.clone(),
            IngestionConfig {
                deduplicate: false,
                ..Default::default()
            },
        );
        let documents = [
            ("Score Policy", "The minimum credit score is 650 for personal loans."),
            ("DTI Policy", "Debt-to-income ratio must stay below forty percent."),
            ("Review Manual", "Loans above one hundred thousand dollars require manual review."),
        ];
        for (title, content) in documents {
            pipeline
                .ingest(content, DocumentInput::new(title, DocumentType::Policy, "seed"), None)
                .await
                .unwrap();
        }

        let retrieval = Arc::new(
            RetrievalEngine::new(
                embedder,
                store,
                config.retrieval.clone(),
                "credit_documents",
            )
            .with_caches(caches.clone()),
        );
        let generator = Arc::new(ScriptedGenerator::new(answer));
        let orchestrator = RagOrchestrator::new(
            retrieval,
            generator.clone(),
            config.rag.clone(),
            "credit_documents",
        )
        .with_caches(caches);
        (orchestrator, generator)
    }

    #[tokio::test]
    async fn answers_carry_sources_citations_and_confidence() {
        let (orchestrator, _) =
            orchestrator_with("The minimum credit score is 650 [1].").await;
        let response = orchestrator
            .query(&RagQuery::new("What is the minimum credit score?"), None)
            .await
            .unwrap();

        assert!(!response.sources.is_empty());
        assert_eq!(response.citations.len(), response.sources.len());
        assert_eq!(response.citations[0].marker, "[1]");
        assert!(response.confidence >= 0.5 && response.confidence <= 0.95);
        assert_eq!(response.metadata.collection, "credit_documents");
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let (orchestrator, generator) = orchestrator_with("Cached answer.").await;
        let query = RagQuery::new("What is the minimum credit score?");

        let first = orchestrator.query(&query, None).await.unwrap();
        let second = orchestrator.query(&query, None).await.unwrap();

        assert_eq!(generator.call_count(), 1);
        assert_eq!(first.answer, second.answer);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let (orchestrator, generator) = orchestrator_with("unused").await;
        let error = orchestrator
            .query(&RagQuery::new("  "), None)
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Validation(_)));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn conversation_memory_records_both_roles_and_is_bounded() {
        let (orchestrator, _) = orchestrator_with("Noted.").await;
        for turn in 0..12 {
            orchestrator
                .conversational_query(&format!("question number {turn}"), "conv-1")
                .await
                .unwrap();
        }

        let history = orchestrator.conversation_history("conv-1");
        assert_eq!(history.len(), RagConfig::default().max_conversation_turns);
        assert!(history.iter().any(|turn| turn.role == TurnRole::User));
        assert!(history.iter().any(|turn| turn.role == TurnRole::Assistant));
        // Oldest turns were dropped first.
        assert!(history[0].content.contains("question number"));
        assert!(!history.iter().any(|turn| turn.content == "question number 0"));

        orchestrator.clear_conversation("conv-1");
        assert!(orchestrator.conversation_history("conv-1").is_empty());
        assert_eq!(orchestrator.conversation_count(), 0);
    }

    #[tokio::test]
    async fn domain_routes_to_its_collection() {
        let (orchestrator, _) = orchestrator_with("No relevant documents.").await;
        let mut query = RagQuery::new("capital requirements");
        query.domain = Some(RagDomain::Regulation);

        // The regulations collection does not exist in this fixture.
        let error = orchestrator.query(&query, None).await.unwrap_err();
        assert!(matches!(error, EngineError::Retrieval(_)));
    }

    #[tokio::test]
    async fn batch_query_preserves_order_and_isolates_failures() {
        let (orchestrator, _) = orchestrator_with("Answer.").await;
        let queries = vec![
            RagQuery::new("credit score"),
            RagQuery::new(""),
            RagQuery::new("manual review"),
        ];
        let responses = orchestrator.batch_query(&queries).await;

        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_ok());
        assert!(responses[1].is_err());
        assert!(responses[2].is_ok());
    }

    #[tokio::test]
    async fn multi_domain_query_reports_per_domain_outcomes() {
        let (orchestrator, _) = orchestrator_with("Answer.").await;
        let outcomes = orchestrator
            .multi_domain_query(
                "score requirements",
                &[RagDomain::CreditPolicy, RagDomain::Regulation],
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, RagDomain::CreditPolicy);
        assert_eq!(outcomes[1].0, RagDomain::Regulation);
    }

    #[tokio::test]
    async fn health_reflects_both_subsystems() {
        let (orchestrator, _) = orchestrator_with("Answer.").await;
        let health = orchestrator.health().await;
        assert!(health.retrieval);
        assert!(health.generation);
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn domain_selects_the_system_preamble() {
        let (orchestrator, _) = orchestrator_with("unused").await;

        let mut query = RagQuery::new("What is the score floor?");
        query.domain = Some(RagDomain::CreditPolicy);
        let messages = orchestrator.build_messages(&query, "context", &[], &[]);
        assert!(messages[0].content.contains("credit policy analyst"));

        // Without a domain the knowledge-base preamble applies.
        let messages =
            orchestrator.build_messages(&RagQuery::new("anything"), "context", &[], &[]);
        assert!(messages[0].content.contains(RagDomain::KnowledgeBase.preamble()));
    }

    #[test]
    fn reasoning_section_is_split_off() {
        let (answer, reasoning) =
            split_reasoning("The score floor is 650.\nReasoning: stated in [1].");
        assert_eq!(answer, "The score floor is 650.");
        assert_eq!(reasoning.as_deref(), Some("stated in [1]."));

        let (answer, reasoning) = split_reasoning("Plain answer.");
        assert_eq!(answer, "Plain answer.");
        assert!(reasoning.is_none());
    }

    #[test]
    fn risk_questions_without_assessment_get_the_note() {
        assert!(needs_compliance_note(
            "How is default risk measured?",
            "Through scorecards."
        ));
        assert!(!needs_compliance_note(
            "How is default risk measured?",
            "Through scorecards, per the risk assessment framework."
        ));
        assert!(!needs_compliance_note("What is the score floor?", "650."));
    }

    #[test]
    fn context_assembly_respects_the_budget() {
        let make = |id: &str, content: &str, score: f64| {
            let mut result = crate::retrieval::tests_support::result_fixture(id, id, score);
            result.content = content.to_string();
            result
        };
        let results = vec![
            make("d1", &"a".repeat(60), 0.9),
            make("d2", &"b".repeat(60), 0.8),
            make("d3", &"c".repeat(60), 0.7),
        ];

        let (context, kept) = assemble_context(results, 160);
        assert_eq!(kept.len(), 2);
        assert!(context.len() <= 160);
        // Lowest-ranked result was the one dropped.
        assert!(kept.iter().all(|result| result.document_id != "d3"));
    }

    #[test]
    fn oversized_first_source_is_truncated_to_the_budget() {
        let mut result = crate::retrieval::tests_support::result_fixture("d1", "d1", 0.9);
        result.content = "x".repeat(500);

        let (context, kept) = assemble_context(vec![result], 100);
        assert_eq!(kept.len(), 1);
        assert_eq!(context.len(), 100);
    }

    #[test]
    fn confidence_grows_with_history_and_diversity() {
        let fixture = |document_id: &str, score: f64| {
            crate::retrieval::tests_support::result_fixture(document_id, document_id, score)
        };

        assert_eq!(confidence_score(&[], false), 0.5);
        // History counts even when retrieval came back empty.
        assert!((confidence_score(&[], true) - 0.6).abs() < 1e-9);

        let single = vec![fixture("d1", 0.5)];
        let base = confidence_score(&single, false);
        assert!((base - 0.65).abs() < 1e-9);
        assert!((confidence_score(&single, true) - 0.75).abs() < 1e-9);

        let diverse = vec![fixture("d1", 1.0), fixture("d2", 1.0), fixture("d3", 1.0)];
        assert_eq!(confidence_score(&diverse, true), 0.95);
    }
}
