//! Subcommand handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use medrag_retrieval::openai::OpenAiEmbeddingProvider;
use medrag_retrieval::{
    BuiltCorpus, CodeRecord, CorpusConfig, CorpusIndexer, CorpusKind, DetailLookup, EmbeddingProvider,
    RetrievalService, StaticDetailLookup, TextRecord, build_code_corpus, build_text_corpus,
};
use medrag_server::{AppState, ServerConfig, run_server};
use medrag_session::gemini::GeminiCollaborator;
use medrag_session::{InMemorySessionStore, SessionManager};
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::records::read_jsonl;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Configuration file
    #[arg(long)]
    pub config: PathBuf,
    /// Corpus to build
    #[arg(long)]
    pub corpus: String,
    /// JSON-lines file of source records
    #[arg(long)]
    pub input: PathBuf,
    /// JSON object mapping codes to detail entries (codes corpora only)
    #[arg(long)]
    pub details: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Configuration file
    #[arg(long)]
    pub config: PathBuf,
    /// Corpus to search
    #[arg(long)]
    pub corpus: String,
    /// Query text
    #[arg(long)]
    pub text: String,
    /// Number of results (defaults to the configured default_top_k)
    #[arg(short)]
    pub k: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long, env = "MEDRAG_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "MEDRAG_PORT", default_value_t = 5000)]
    pub port: u16,
}

fn embedding_provider(dimension: Option<usize>) -> Result<Arc<dyn EmbeddingProvider>> {
    let mut provider = OpenAiEmbeddingProvider::from_env().context("embedding provider")?;
    if let Some(dimension) = dimension {
        provider = provider.with_dimensions(dimension);
    }
    info!(model = %provider.model(), dimensions = provider.dimensions(), "embedding provider ready");
    Ok(Arc::new(provider))
}

async fn collect_documents(corpus: &CorpusConfig, args: &BuildArgs) -> Result<BuiltCorpus> {
    if corpus.kind == CorpusKind::Codes {
        let lookup = args
            .details
            .as_deref()
            .map(StaticDetailLookup::from_json_file)
            .transpose()
            .context("cannot load code details")?;
        let records = read_jsonl::<CodeRecord>(&args.input)?;
        return Ok(build_code_corpus(records, lookup.as_ref().map(|l| l as &dyn DetailLookup)).await);
    }

    if args.details.is_some() {
        warn!(corpus = %corpus.name, "--details only applies to codes corpora, ignoring");
    }
    Ok(build_text_corpus(read_jsonl::<TextRecord>(&args.input)?))
}

/// Build a corpus from a JSON-lines file and persist its artifacts.
pub async fn build(args: BuildArgs) -> Result<()> {
    let config = AppConfig::from_json_file(&args.config)?;
    let corpus = config.corpus(&args.corpus)?.clone();

    let built = collect_documents(&corpus, &args).await?;
    let indexer = CorpusIndexer::builder()
        .config(corpus.clone())
        .embedding_provider(embedding_provider(Some(corpus.dimension))?)
        .build()?;
    let summary = indexer
        .build_and_persist(&built.documents)
        .await
        .with_context(|| format!("building corpus '{}'", corpus.name))?;

    info!(
        corpus = %corpus.name,
        index = %corpus.index_path.display(),
        metadata = %corpus.metadata_path.display(),
        "build completed"
    );
    let report = json!({ "corpus": corpus.name, "summary": summary, "stats": built.stats });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Load one corpus and print the top-k results for a query.
pub async fn query(args: QueryArgs) -> Result<()> {
    let config = AppConfig::from_json_file(&args.config)?;
    let corpus = config.corpus(&args.corpus)?.clone();

    let service =
        RetrievalService::new(embedding_provider(Some(corpus.dimension))?, config.engine.retrieval.clone());
    service.load_corpus(corpus).await?;

    let k = args.k.unwrap_or(config.engine.retrieval.default_top_k);
    let results = service.query(&args.corpus, &args.text, k).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "corpus": args.corpus, "results": results }))?);
    Ok(())
}

/// Load every configured corpus and serve the HTTP API.
pub async fn serve(args: ServeArgs) -> Result<()> {
    let config = AppConfig::from_json_file(&args.config)?;

    let provider = embedding_provider(config.embedding_dimension()?)?;
    let retrieval = Arc::new(RetrievalService::from_engine_config(provider, &config.engine).await);
    for status in retrieval.status().await.iter().filter(|s| !s.available) {
        warn!(corpus = %status.name, reason = ?status.reason, "corpus not available");
    }

    let collaborator = GeminiCollaborator::from_env().context("collaborator")?;
    let sessions = SessionManager::new(
        config.session.clone(),
        Arc::new(collaborator),
        retrieval.clone(),
        Arc::new(InMemorySessionStore::new()),
    )?;

    let state = AppState { sessions: Arc::new(sessions), retrieval };
    run_server(ServerConfig { host: args.host, port: args.port }, state).await
}
