//! Command-line front end for waypoint.
//!
//! `waypoint ask <QUERY>` answers one travel query against an index;
//! `waypoint index --input FILE` builds that index from JSON lines. Every
//! flag falls back to a `WAYPOINT_*` environment variable, and a `.env` file
//! in the working directory is read first.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use waypoint_rag::gemini::GeminiEmbeddingProvider;
use waypoint_rag::openai::OpenAIEmbeddingProvider;
use waypoint_rag::{
    ApiKey, DEFAULT_TOP_K, DocumentStore, EmbeddingProvider, FusionPolicy, GenerationConfig,
    GenerationProvider, HashingEmbedder, IndexBuilder, IndexManifest, Metric, OutputSchema,
    PipelineConfig, PromptAssembler, PromptTemplate, RagError, RecommendationPipeline, Strategy,
    build_generation_client, read_documents_jsonl,
};

/// Travel recommendations from a local attraction index.
#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer one travel query
    Ask(AskArgs),
    /// Build an index directory from a JSON-lines file
    Index(IndexArgs),
}

/// How documents and queries are embedded.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Offline feature hashing; needs no credential
    Hashing,
    Gemini,
    Openai,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionKind {
    /// Reciprocal rank fusion
    Rrf,
    /// Weighted min-max score fusion
    Weighted,
}

#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend; must match the one the index was built with
    #[arg(long, env = "WAYPOINT_EMBEDDER", value_enum, default_value = "hashing")]
    pub embedder: EmbedderKind,

    /// Embedding model override
    #[arg(long, env = "WAYPOINT_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Credential for the embedding API (defaults to the generation key)
    #[arg(long, env = "WAYPOINT_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    /// The traveler's request
    pub query: String,

    /// Index directory built by `waypoint index`
    #[arg(long, env = "WAYPOINT_INDEX_DIR", default_value = "index")]
    pub index_dir: PathBuf,

    /// Retrieval strategy: dense, lexical or hybrid
    #[arg(long, env = "WAYPOINT_STRATEGY", default_value = "dense")]
    pub strategy: Strategy,

    /// Number of candidates handed to the model
    #[arg(long, env = "WAYPOINT_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Drop candidates scoring below this value
    #[arg(long, env = "WAYPOINT_MIN_SCORE")]
    pub min_score: Option<f32>,

    /// Hybrid fusion policy
    #[arg(long, env = "WAYPOINT_FUSION", value_enum, default_value = "rrf")]
    pub fusion: FusionKind,

    /// Smoothing constant for reciprocal rank fusion
    #[arg(long, default_value_t = FusionPolicy::DEFAULT_RRF_K)]
    pub rrf_k: f32,

    /// Weight of the dense ranking in weighted fusion
    #[arg(long, default_value_t = FusionPolicy::DEFAULT_DENSE_WEIGHT)]
    pub dense_weight: f32,

    /// Generation provider: gemini or openai
    #[arg(long, env = "WAYPOINT_PROVIDER", default_value = "gemini")]
    pub provider: GenerationProvider,

    /// Model id (defaults to the provider's default model)
    #[arg(long, env = "WAYPOINT_MODEL")]
    pub model: Option<String>,

    /// Credential for the generation API
    #[arg(long, env = "WAYPOINT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the provider's API base URL
    #[arg(long, env = "WAYPOINT_BASE_URL")]
    pub base_url: Option<String>,

    /// Bound on the generation request, in seconds
    #[arg(long, env = "WAYPOINT_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Prompt template file with {{USER_QUERY}} and {{RETRIEVED_NODES}}
    #[arg(long, env = "WAYPOINT_TEMPLATE")]
    pub template: Option<PathBuf>,

    #[command(flatten)]
    pub embedding: EmbedderArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// JSON-lines file of `{id?, text, metadata?}` records
    #[arg(long)]
    pub input: PathBuf,

    /// Output directory
    #[arg(long, env = "WAYPOINT_INDEX_DIR", default_value = "index")]
    pub index_dir: PathBuf,

    /// Distance metric for dense retrieval
    #[arg(long, default_value = "cosine")]
    pub metric: Metric,

    /// Documents per embedding request
    #[arg(long, default_value_t = IndexBuilder::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Fallback credential for remote embedders
    #[arg(long, env = "WAYPOINT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(flatten)]
    pub embedding: EmbedderArgs,
}

impl AskArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig, RagError> {
        let fusion = match self.fusion {
            FusionKind::Rrf => FusionPolicy::ReciprocalRank { k: self.rrf_k },
            FusionKind::Weighted => FusionPolicy::Weighted { dense_weight: self.dense_weight },
        };
        PipelineConfig::builder()
            .strategy(self.strategy)
            .top_k(self.top_k)
            .min_score(self.min_score)
            .fusion(fusion)
            .build()
    }

    fn generation_config(&self) -> Result<GenerationConfig, RagError> {
        let api_key = resolve_api_key(self.api_key.as_deref(), self.provider)?;
        let mut config = GenerationConfig::new(self.provider, api_key)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        Ok(config)
    }
}

/// Use the explicit key, else the provider's conventional variable.
fn resolve_api_key(explicit: Option<&str>, provider: GenerationProvider) -> Result<ApiKey, RagError> {
    if let Some(key) = explicit {
        return ApiKey::new(key);
    }
    let var = match provider {
        GenerationProvider::Gemini => "GOOGLE_API_KEY",
        GenerationProvider::OpenAI => "OPENAI_API_KEY",
    };
    ApiKey::from_env(var).map_err(|_| {
        RagError::ConfigError(format!(
            "no API key for {provider:?}: pass --api-key or set WAYPOINT_API_KEY or {var}"
        ))
    })
}

/// Build the embedder selected by `args`. `fallback_key` is used when no
/// dedicated embedding key is given.
pub fn build_embedder(
    args: &EmbedderArgs,
    fallback_key: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
    let key = args.embedding_api_key.as_deref().or(fallback_key);
    let embedder: Arc<dyn EmbeddingProvider> = match args.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::Gemini => {
            let key = resolve_api_key(key, GenerationProvider::Gemini)?;
            let mut provider = GeminiEmbeddingProvider::new(key)?;
            if let Some(model) = &args.embedding_model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
        EmbedderKind::Openai => {
            let key = resolve_api_key(key, GenerationProvider::OpenAI)?;
            let mut provider = OpenAIEmbeddingProvider::new(key)?;
            if let Some(model) = &args.embedding_model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
    };
    Ok(embedder)
}

/// Answer `args.query` and return the normalized text.
///
/// Configuration and the index are checked before any network call, so a
/// bad setup fails fast without spending a generation request.
pub async fn ask(args: AskArgs) -> anyhow::Result<String> {
    let config = args.pipeline_config()?;

    let schema = OutputSchema::default();
    let assembler = match &args.template {
        Some(path) => PromptAssembler::new(PromptTemplate::from_file(path, &schema).await?),
        None => PromptAssembler::for_schema(&schema),
    };

    let store = Arc::new(DocumentStore::load(&args.index_dir).await?);

    let embedder = match config.strategy {
        Strategy::Lexical => None,
        Strategy::Dense | Strategy::Hybrid => {
            Some(build_embedder(&args.embedding, args.api_key.as_deref())?)
        }
    };

    let generator = build_generation_client(&args.generation_config()?)?;

    let mut builder = RecommendationPipeline::builder()
        .config(config)
        .store(store)
        .assembler(assembler)
        .generator(generator);
    if let Some(embedder) = embedder {
        builder = builder.embedder(embedder);
    }
    let pipeline = builder.build()?;

    Ok(pipeline.answer(&args.query).await?)
}

/// Build an index directory from `args.input`.
pub async fn index(args: IndexArgs) -> anyhow::Result<IndexManifest> {
    let documents = read_documents_jsonl(&args.input).await?;
    info!(input = %args.input.display(), documents = documents.len(), "read input");

    let embedder = build_embedder(&args.embedding, args.api_key.as_deref())?;
    let manifest = IndexBuilder::new()
        .with_batch_size(args.batch_size)
        .build(&documents, embedder.as_ref(), args.metric, &args.index_dir)
        .await
        .with_context(|| format!("failed to build index in {}", args.index_dir.display()))?;
    Ok(manifest)
}
