use chrono::Utc;
use clap::{Parser, Subcommand};
use credit_rag_core::{
    ChromaStore, DocumentInput, DocumentType, EngineCaches, EngineConfig, HashingEmbedder,
    HttpGenerator, IngestionPipeline, MemoryVectorStore, RagDomain, RagOrchestrator, RagQuery,
    RerankMode, RetrievalEngine, RetrievalOptions, RetrievalStrategy, VectorStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "credit-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// ChromaDB base URL
    #[arg(long, default_value = "http://localhost:8000")]
    chroma_url: String,

    /// ChromaDB auth token
    #[arg(long, env = "CHROMA_AUTH_TOKEN")]
    chroma_token: Option<String>,

    /// Generation endpoint base URL (OpenAI-compatible)
    #[arg(long, default_value = "http://localhost:8080")]
    generation_url: String,

    /// Generation API key
    #[arg(long, env = "GENERATION_API_KEY")]
    api_key: Option<String>,

    /// Use the in-process store instead of ChromaDB.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Default collection name
    #[arg(long, default_value = "credit_documents")]
    collection: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the default and domain collections in the store.
    Init,
    /// Ingest a text/markdown file, or a folder of them recursively.
    Ingest {
        /// File or folder to ingest.
        #[arg(long)]
        path: String,
        /// Document title; defaults to the file stem.
        #[arg(long)]
        title: Option<String>,
        /// Document type: policy, regulation, guideline, manual, faq,
        /// report, case_study.
        #[arg(long, default_value = "policy")]
        doc_type: String,
        /// Source label recorded in metadata.
        #[arg(long, default_value = "cli")]
        source: String,
        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,
    },
    /// Retrieve chunks without generating an answer.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Strategy: vector, keyword, hybrid, semantic, contextual.
        #[arg(long)]
        strategy: Option<String>,
        /// Rerank mode: semantic, cross_encoder, custom.
        #[arg(long)]
        rerank: Option<String>,
    },
    /// Ask a question and get a cited, confidence-scored answer.
    Query {
        /// The question
        #[arg(long)]
        question: String,
        /// Domain preset: credit_policy, risk_model, regulation,
        /// knowledge_base, case_studies.
        #[arg(long)]
        domain: Option<String>,
        /// Conversation id for multi-turn memory.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Show collection statistics.
    Stats,
    /// Check store, embedder, and generation endpoint health.
    Health,
}

fn parse_strategy(value: &str) -> anyhow::Result<RetrievalStrategy> {
    match value.to_ascii_lowercase().as_str() {
        "vector" | "vector_only" => Ok(RetrievalStrategy::VectorOnly),
        "keyword" | "keyword_only" => Ok(RetrievalStrategy::KeywordOnly),
        "hybrid" => Ok(RetrievalStrategy::Hybrid),
        "semantic" | "semantic_search" => Ok(RetrievalStrategy::SemanticSearch),
        "contextual" => Ok(RetrievalStrategy::Contextual),
        other => anyhow::bail!("unknown strategy: {other}"),
    }
}

fn parse_rerank(value: &str) -> anyhow::Result<RerankMode> {
    match value.to_ascii_lowercase().as_str() {
        "semantic" => Ok(RerankMode::Semantic),
        "cross_encoder" | "cross-encoder" => Ok(RerankMode::CrossEncoder),
        "custom" => Ok(RerankMode::Custom),
        other => anyhow::bail!("unknown rerank mode: {other}"),
    }
}

fn parse_domain(value: &str) -> anyhow::Result<RagDomain> {
    match value.to_ascii_lowercase().as_str() {
        "credit_policy" => Ok(RagDomain::CreditPolicy),
        "risk_model" => Ok(RagDomain::RiskModel),
        "regulation" => Ok(RagDomain::Regulation),
        "knowledge_base" => Ok(RagDomain::KnowledgeBase),
        "case_studies" => Ok(RagDomain::CaseStudies),
        other => anyhow::bail!("unknown domain: {other}"),
    }
}

fn is_ingestible(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|extension| extension.to_str()),
        Some("txt") | Some("md")
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::default();

    let embedder = Arc::new(HashingEmbedder::default());
    let store: Arc<dyn VectorStore> = if cli.in_memory {
        Arc::new(MemoryVectorStore::new())
    } else {
        Arc::new(ChromaStore::new(&cli.chroma_url, cli.chroma_token.clone()))
    };
    let caches = Arc::new(EngineCaches::new(&config.cache));

    let mut ingestion_config = config.ingestion.clone();
    ingestion_config.default_collection = cli.collection.clone();
    let pipeline = IngestionPipeline::new(embedder.clone(), store.clone(), ingestion_config)
        .with_caches(caches.clone());

    let retrieval = Arc::new(
        RetrievalEngine::new(
            embedder.clone(),
            store.clone(),
            config.retrieval.clone(),
            cli.collection.clone(),
        )
        .with_caches(caches.clone()),
    );

    let generator = Arc::new(HttpGenerator::new(
        &cli.generation_url,
        cli.api_key.clone(),
        Duration::from_secs(60),
    )?);
    let orchestrator = RagOrchestrator::new(
        retrieval.clone(),
        generator,
        config.rag.clone(),
        cli.collection.clone(),
    )
    .with_caches(caches);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        collection = %cli.collection,
        "credit-rag boot"
    );

    match cli.command {
        Command::Init => {
            let names = pipeline.ensure_collections().await?;
            for name in &names {
                println!("collection ready: {name}");
            }
            println!("{} collections ensured", names.len());
        }
        Command::Ingest {
            path,
            title,
            doc_type,
            source,
            tags,
        } => {
            let doc_type = DocumentType::parse(&doc_type)
                .ok_or_else(|| anyhow::anyhow!("unknown document type: {doc_type}"))?;
            let tags: Vec<String> = tags
                .map(|list| list.split(',').map(|tag| tag.trim().to_string()).collect())
                .unwrap_or_default();

            let root = Path::new(&path);
            let files: Vec<std::path::PathBuf> = if root.is_dir() {
                WalkDir::new(root)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|path| is_ingestible(path))
                    .collect()
            } else {
                vec![root.to_path_buf()]
            };
            if files.is_empty() {
                println!("0 documents ingested (no .txt or .md files found)");
                return Ok(());
            }

            let mut ingested = 0usize;
            for file in files {
                let content = match tokio::fs::read_to_string(&file).await {
                    Ok(content) => content,
                    Err(error) => {
                        warn!(path = %file.display(), %error, "skipped unreadable file");
                        continue;
                    }
                };
                let document_title = title.clone().unwrap_or_else(|| {
                    file.file_stem()
                        .and_then(|stem| stem.to_str())
                        .unwrap_or("untitled")
                        .to_string()
                });
                let mut input = DocumentInput::new(document_title, doc_type, source.clone());
                input.tags = tags.clone();

                match pipeline.ingest(&content, input, None).await {
                    Ok(result) => {
                        ingested += 1;
                        println!(
                            "ingested document_id={} chunks={} collection={}",
                            result.document_id, result.chunk_count, result.collection
                        );
                    }
                    Err(error) => {
                        warn!(path = %file.display(), %error, "ingestion failed");
                    }
                }
            }
            println!("{ingested} documents ingested at {}", Utc::now().to_rfc3339());
        }
        Command::Search {
            query,
            top_k,
            strategy,
            rerank,
        } => {
            let options = RetrievalOptions {
                top_k: Some(top_k),
                strategy: strategy.as_deref().map(parse_strategy).transpose()?,
                rerank: rerank.as_deref().map(parse_rerank).transpose()?,
                ..Default::default()
            };
            let response = retrieval.retrieve(&query, &options).await?;

            println!(
                "query: {} strategy={} collection={}",
                response.original_query,
                response.strategy.as_str(),
                response.collection
            );
            if let Some(expanded) = &response.expanded_query {
                println!("expanded: {expanded}");
            }
            for result in response.results {
                println!(
                    "score={:.4} chunk={} document_id={} title={}",
                    result.score, result.chunk_index, result.document_id, result.metadata.title
                );
                println!("  {}", result.content);
                for highlight in result.highlights {
                    println!("  highlight: {highlight}");
                }
            }
        }
        Command::Query {
            question,
            domain,
            conversation,
        } => {
            let mut query = RagQuery::new(question);
            query.domain = domain.as_deref().map(parse_domain).transpose()?;
            let response = orchestrator.query(&query, conversation.as_deref()).await?;

            println!("{}", response.answer);
            if let Some(reasoning) = &response.reasoning {
                println!("\nreasoning: {reasoning}");
            }
            println!(
                "\nconfidence={:.2} model={} strategy={}",
                response.confidence,
                response.metadata.model,
                response.metadata.strategy.as_str()
            );
            for citation in response.citations {
                println!("{} {}: {}", citation.marker, citation.title, citation.excerpt);
            }
            for insight in response.insights {
                println!("insight: {insight}");
            }
        }
        Command::Stats => {
            let stats = store.collection_stats(&cli.collection).await?;
            println!(
                "collection={} documents={} dimension={}",
                cli.collection, stats.document_count, stats.dimension
            );
        }
        Command::Health => {
            let health = orchestrator.health().await;
            println!(
                "retrieval={} generation={} healthy={}",
                health.retrieval,
                health.generation,
                health.is_healthy()
            );
        }
    }

    Ok(())
}
