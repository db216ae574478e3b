use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Policy,
    Regulation,
    Guideline,
    Manual,
    Faq,
    Report,
    CaseStudy,
}

impl DocumentType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "policy" => Some(Self::Policy),
            "regulation" => Some(Self::Regulation),
            "guideline" => Some(Self::Guideline),
            "manual" => Some(Self::Manual),
            "faq" => Some(Self::Faq),
            "report" => Some(Self::Report),
            "case_study" | "case-study" => Some(Self::CaseStudy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Regulation => "regulation",
            Self::Guideline => "guideline",
            Self::Manual => "manual",
            Self::Faq => "faq",
            Self::Report => "report",
            Self::CaseStudy => "case_study",
        }
    }
}

/// Caller-supplied description of a document to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Optional caller identity; derived from content+title+source when absent.
    pub id: Option<String>,
    pub title: String,
    pub doc_type: Option<DocumentType>,
    pub source: String,
    pub author: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl DocumentInput {
    pub fn new(title: impl Into<String>, doc_type: DocumentType, source: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            doc_type: Some(doc_type),
            source: source.into(),
            author: None,
            version: None,
            tags: Vec::new(),
            category: None,
        }
    }
}

/// Structural signals detected during content analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructureSignals {
    pub paragraph_count: usize,
    pub has_headers: bool,
    pub has_bullets: bool,
    pub has_numbered_lists: bool,
}

/// Enriched, immutable metadata of an indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub source: String,
    pub author: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub language: String,
    pub size_bytes: usize,
    pub checksum: String,
    pub structure: StructureSignals,
    pub key_terms: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A content-contiguous slice of a document, the unit of embedding and
/// retrieval. Chunks of one document are gap-free and ordered by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub embedding: Vec<f32>,
}

/// Filter values supported in store metadata queries.
pub type SearchFilters = BTreeMap<String, serde_json::Value>;

/// Store-level search request; at least one of `query_text` /
/// `embedding` must be set.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub top_k: usize,
    pub threshold: Option<f64>,
    pub filters: SearchFilters,
}

/// Ephemeral per-query hit. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f64,
    pub metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    VectorOnly,
    KeywordOnly,
    Hybrid,
    SemanticSearch,
    Contextual,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorOnly => "vector_only",
            Self::KeywordOnly => "keyword_only",
            Self::Hybrid => "hybrid",
            Self::SemanticSearch => "semantic_search",
            Self::Contextual => "contextual",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    Semantic,
    CrossEncoder,
    Custom,
}

/// Per-call retrieval options; unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub collection: Option<String>,
    pub top_k: Option<usize>,
    pub threshold: Option<f64>,
    pub strategy: Option<RetrievalStrategy>,
    pub expand_query: Option<bool>,
    pub rerank: Option<RerankMode>,
    pub filters: SearchFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievalResult>,
    pub strategy: RetrievalStrategy,
    pub original_query: String,
    /// Set when query expansion rewrote the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_query: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in a bounded per-conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn now(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Domain presets mapping to collection names and system preambles.
/// The wording is configuration data consumed by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RagDomain {
    CreditPolicy,
    RiskModel,
    Regulation,
    KnowledgeBase,
    CaseStudies,
}

impl RagDomain {
    pub const ALL: [RagDomain; 5] = [
        RagDomain::CreditPolicy,
        RagDomain::RiskModel,
        RagDomain::Regulation,
        RagDomain::KnowledgeBase,
        RagDomain::CaseStudies,
    ];

    pub fn collection(&self) -> &'static str {
        match self {
            Self::CreditPolicy => "credit_policies",
            Self::RiskModel => "risk_models",
            Self::Regulation => "regulations",
            Self::KnowledgeBase => "knowledge_base",
            Self::CaseStudies => "case_studies",
        }
    }

    pub fn preamble(&self) -> &'static str {
        match self {
            Self::CreditPolicy => {
                "You are a credit policy analyst. Answer strictly from the \
                 retrieved policy excerpts and cite the policy that applies."
            }
            Self::RiskModel => {
                "You are a credit risk model specialist. Explain model \
                 behaviour and feature weights using only the retrieved \
                 documentation."
            }
            Self::Regulation => {
                "You are a regulatory compliance assistant. Ground every \
                 statement in the retrieved regulation text."
            }
            Self::KnowledgeBase => {
                "You are an institutional knowledge assistant for credit \
                 decisioning. Answer from the retrieved context."
            }
            Self::CaseStudies => {
                "You are a credit case analyst. Compare the question against \
                 the retrieved historical cases."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditPolicy => "credit_policy",
            Self::RiskModel => "risk_model",
            Self::Regulation => "regulation",
            Self::KnowledgeBase => "knowledge_base",
            Self::CaseStudies => "case_studies",
        }
    }
}

/// A question for the RAG orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RagQuery {
    pub question: String,
    pub collection: Option<String>,
    pub domain: Option<RagDomain>,
    pub top_k: Option<usize>,
    pub threshold: Option<f64>,
    pub strategy: Option<RetrievalStrategy>,
    pub filters: SearchFilters,
}

impl RagQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Marker as referenced in the answer text, e.g. `[1]`.
    pub marker: String,
    pub document_id: String,
    pub title: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub query: String,
    pub collection: String,
    pub strategy: RetrievalStrategy,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<RagDomain>,
}

/// Cited, confidence-scored answer produced by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub sources: Vec<RetrievalResult>,
    /// Heuristic reliability estimate in [0, 0.95].
    pub confidence: f64,
    pub usage: TokenUsage,
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestionStatus {
    Success,
    Failed { error: String },
}

/// Outcome of one document ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub document_id: String,
    pub collection: String,
    pub chunk_count: usize,
    pub status: IngestionStatus,
}

impl IngestionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, IngestionStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_parses_known_labels() {
        assert_eq!(DocumentType::parse("Policy"), Some(DocumentType::Policy));
        assert_eq!(DocumentType::parse("FAQ"), Some(DocumentType::Faq));
        assert_eq!(DocumentType::parse("case-study"), Some(DocumentType::CaseStudy));
        assert_eq!(DocumentType::parse("novel"), None);
    }

    #[test]
    fn domains_map_to_distinct_collections() {
        let mut collections: Vec<_> = RagDomain::ALL.iter().map(|d| d.collection()).collect();
        collections.sort_unstable();
        collections.dedup();
        assert_eq!(collections.len(), RagDomain::ALL.len());
    }
}
