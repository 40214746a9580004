//! The recommendation pipeline coordinator.
//!
//! A [`RecommendationPipeline`] answers one query at a time by running
//! retrieve → assemble → generate → normalize. Each call is all-or-nothing:
//! it either returns the normalized answer or the error of the first stage
//! that failed.
//!
//! # Example
//!
//! ```rust,ignore
//! use waypoint_rag::{PipelineConfig, RecommendationPipeline, Strategy};
//!
//! let pipeline = RecommendationPipeline::builder()
//!     .config(PipelineConfig::builder().strategy(Strategy::Hybrid).top_k(5).build()?)
//!     .store(store)
//!     .embedder(embedder)
//!     .generator(generator)
//!     .build()?;
//!
//! let answer = pipeline.answer("beach destinations in Egypt").await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerationClient;
use crate::normalize::OutputNormalizer;
use crate::prompt::PromptAssembler;
use crate::retriever::{Retriever, build_retriever, normalize_query};
use crate::store::DocumentStore;

/// Where a single [`answer`](RecommendationPipeline::answer) call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Retrieving,
    Assembling,
    Generating,
    Normalizing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Retrieving => "retrieving",
            Stage::Assembling => "assembling",
            Stage::Generating => "generating",
            Stage::Normalizing => "normalizing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call stage tracker. Only lives for one `answer` call.
struct Run {
    stage: Stage,
}

impl Run {
    fn start() -> Self {
        Self { stage: Stage::Idle }
    }

    fn enter(&mut self, next: Stage) {
        debug!(from = %self.stage, to = %next, "pipeline stage");
        self.stage = next;
    }

    fn fail(&mut self, err: RagError) -> RagError {
        debug!(stage = %self.stage, kind = ?err.kind(), error = %err, "pipeline failed");
        self.stage = Stage::Failed;
        err
    }
}

/// Retrieval-augmented recommendation pipeline.
///
/// Holds only read-only shared state, so one instance can serve concurrent
/// calls through an `Arc`.
pub struct RecommendationPipeline {
    config: PipelineConfig,
    retriever: Arc<dyn Retriever>,
    assembler: PromptAssembler,
    generator: Arc<dyn GenerationClient>,
    normalizer: OutputNormalizer,
}

impl fmt::Debug for RecommendationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecommendationPipeline")
            .field("config", &self.config)
            .field("strategy", &self.retriever.strategy())
            .field("generator", &self.generator.name())
            .finish()
    }
}

impl RecommendationPipeline {
    pub fn builder() -> RecommendationPipelineBuilder {
        RecommendationPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    /// Answer one query.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyQuery`] for a blank query.
    /// - Any retrieval or generation error, unchanged.
    /// - [`RagError::MalformedResponse`] if the normalized answer is empty.
    #[instrument(skip_all, fields(strategy = %self.config.strategy, top_k = self.config.top_k))]
    pub async fn answer(&self, query: &str) -> Result<String> {
        let started = Instant::now();
        let mut run = Run::start();

        let query = normalize_query(query).map_err(|e| run.fail(e))?;

        run.enter(Stage::Retrieving);
        let candidates =
            self.retriever.retrieve(query, self.config.top_k).await.map_err(|e| run.fail(e))?;
        debug!(candidates = candidates.len(), "retrieved candidates");
        if candidates.is_empty() {
            info!("no candidates cleared retrieval; generating without context");
        }

        run.enter(Stage::Assembling);
        let prompt = self.assembler.assemble(query, &candidates);
        debug!(prompt_len = prompt.len(), "assembled prompt");

        run.enter(Stage::Generating);
        let raw = self.generator.generate(&prompt).await.map_err(|e| run.fail(e))?;

        run.enter(Stage::Normalizing);
        let answer = self.normalizer.normalize(&raw);
        if answer.is_empty() {
            return Err(run.fail(RagError::MalformedResponse(
                "model returned no displayable text".to_string(),
            )));
        }

        run.enter(Stage::Done);
        info!(
            query_len = query.len(),
            candidates = candidates.len(),
            answer_len = answer.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );
        Ok(answer)
    }
}

/// Builder for [`RecommendationPipeline`].
///
/// Either set a [`retriever`](Self::retriever) directly, or give a
/// [`store`](Self::store) (plus an [`embedder`](Self::embedder) for dense and
/// hybrid retrieval) and let the builder pick the retriever from the config.
/// The assembler and normalizer default to the travel schema.
#[derive(Default)]
pub struct RecommendationPipelineBuilder {
    config: Option<PipelineConfig>,
    retriever: Option<Arc<dyn Retriever>>,
    store: Option<Arc<DocumentStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    assembler: Option<PromptAssembler>,
    generator: Option<Arc<dyn GenerationClient>>,
    normalizer: Option<OutputNormalizer>,
}

impl RecommendationPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn store(mut self, store: Arc<DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn normalizer(mut self, normalizer: OutputNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the config or generator is
    /// missing, neither a retriever nor a store was given, or the given
    /// retriever's strategy disagrees with the config. Errors from
    /// [`build_retriever`] pass through.
    pub fn build(self) -> Result<RecommendationPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::ConfigError("generator is required".to_string()))?;

        let retriever = match (self.retriever, self.store) {
            (Some(retriever), _) => {
                if retriever.strategy() != config.strategy {
                    return Err(RagError::ConfigError(format!(
                        "retriever implements {} but the config selects {}",
                        retriever.strategy(),
                        config.strategy
                    )));
                }
                retriever
            }
            (None, Some(store)) => build_retriever(&config, store, self.embedder)?,
            (None, None) => {
                return Err(RagError::ConfigError(
                    "either a retriever or a document store is required".to_string(),
                ));
            }
        };

        Ok(RecommendationPipeline {
            config,
            retriever,
            assembler: self.assembler.unwrap_or_default(),
            generator,
            normalizer: self.normalizer.unwrap_or_default(),
        })
    }
}
