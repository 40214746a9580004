//! Retriever trait and strategy selection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::dense::DenseRetriever;
use crate::document::{Candidate, Strategy};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::hybrid::HybridRetriever;
use crate::lexical::LexicalRetriever;
use crate::store::DocumentStore;

/// Produces a ranked, size-bounded list of candidates for a query.
///
/// Implementations are read-only over a shared [`DocumentStore`] and safe to
/// call from concurrent tasks.
///
/// # Contract
///
/// - The result is ordered best match first and has at most `top_k` entries.
/// - An empty or whitespace-only query fails with [`RagError::EmptyQuery`].
/// - When nothing clears the configured threshold the result is empty, not an error.
///
/// # Example
///
/// ```rust,ignore
/// use waypoint_rag::{DenseRetriever, Retriever};
///
/// let retriever = DenseRetriever::new(store, embedder);
/// let candidates = retriever.retrieve("beach destinations in Egypt", 5).await?;
/// ```
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The strategy this retriever implements.
    fn strategy(&self) -> Strategy;

    /// Return up to `top_k` candidates for `query`, best match first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>>;
}

/// Trim a query, rejecting it if nothing is left.
pub fn normalize_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(RagError::EmptyQuery);
    }
    Ok(trimmed)
}

/// Build the retriever selected by `config.strategy`.
///
/// The dense and hybrid strategies need `embedder`; it must be the embedder
/// the store was built with.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if a dense-based strategy is selected
/// without an embedder, and [`RagError::IndexUnavailable`] if the embedder
/// does not match the index manifest.
pub fn build_retriever(
    config: &PipelineConfig,
    store: Arc<DocumentStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn Retriever>> {
    let dense = |embedder: Option<Arc<dyn EmbeddingProvider>>| -> Result<DenseRetriever> {
        let embedder = embedder.ok_or_else(|| {
            RagError::ConfigError(format!("the {} strategy requires an embedder", config.strategy))
        })?;
        store.check_embedder(embedder.as_ref())?;
        Ok(DenseRetriever::new(store.clone(), embedder).with_min_score(config.min_score))
    };

    let retriever: Arc<dyn Retriever> = match config.strategy {
        Strategy::Dense => Arc::new(dense(embedder)?),
        Strategy::Lexical => {
            Arc::new(LexicalRetriever::new(store.clone()).with_min_score(config.min_score))
        }
        Strategy::Hybrid => Arc::new(HybridRetriever::new(
            Arc::new(dense(embedder)?),
            Arc::new(LexicalRetriever::new(store.clone()).with_min_score(config.min_score)),
            config.fusion,
        )),
    };
    Ok(retriever)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_query_trims() {
        assert_eq!(normalize_query("  beach  ").unwrap(), "beach");
        assert!(matches!(normalize_query(" \t\n"), Err(RagError::EmptyQuery)));
        assert!(matches!(normalize_query(""), Err(RagError::EmptyQuery)));
    }
}
