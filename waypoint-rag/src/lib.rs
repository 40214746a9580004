//! Retrieval-augmented travel recommendations.
//!
//! This crate provides:
//! - A read-only [`DocumentStore`] loaded from an index directory
//! - Dense, lexical (BM25) and hybrid [`Retriever`] strategies
//! - Prompt assembly and output normalization driven by one [`OutputSchema`]
//! - Gemini and OpenAI [`GenerationClient`]s (feature-gated)
//! - The [`RecommendationPipeline`] coordinator
//! - [`IndexBuilder`] for turning JSON-lines records into an index

pub mod config;
pub mod dense;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hybrid;
pub mod ingest;
pub mod lexical;
pub mod normalize;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod schema;
pub mod store;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use config::{
    ApiKey, DEFAULT_GENERATION_TIMEOUT, DEFAULT_TOP_K, GenerationConfig, GenerationProvider,
    PipelineConfig, PipelineConfigBuilder,
};
pub use dense::DenseRetriever;
pub use document::{Candidate, Document, Strategy};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{ErrorKind, RagError, Result};
pub use generation::{GenerationClient, build_generation_client};
pub use hybrid::{FusionPolicy, HybridRetriever};
pub use ingest::{IndexBuilder, read_documents_jsonl};
pub use lexical::{Analyzer, Bm25Index, LexicalRetriever};
pub use normalize::{OutputNormalizer, normalize};
pub use pipeline::{RecommendationPipeline, RecommendationPipelineBuilder, Stage};
pub use prompt::{PromptAssembler, PromptTemplate};
pub use retriever::{Retriever, build_retriever};
pub use schema::{OutputSchema, Section};
pub use store::{DocumentStore, IndexManifest, Metric};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiClient, GeminiEmbeddingProvider};
#[cfg(feature = "openai")]
pub use openai::{OpenAIChatClient, OpenAIEmbeddingProvider};
