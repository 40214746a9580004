//! Dense retrieval: exact nearest-neighbour search over stored embeddings.
//!
//! The search is a flat scan, which is exact and deterministic. Scores are
//! reported so that higher is always better: cosine similarity for cosine
//! indexes, `1 / (1 + distance)` for L2 indexes.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Candidate, Strategy};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::retriever::{Retriever, normalize_query};
use crate::store::{DocumentStore, Metric};

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean distance between two vectors.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// A scored position in the store. `distance` is set for L2 only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub position: usize,
    pub score: f32,
    pub distance: Option<f32>,
}

/// Rank every stored vector against `query` and keep the best `top_k`.
///
/// Ties keep insertion order. NaN scores sort last.
pub fn nearest(vectors: &[Vec<f32>], query: &[f32], metric: Metric, top_k: usize) -> Vec<Neighbour> {
    let mut scored: Vec<Neighbour> = vectors
        .iter()
        .enumerate()
        .map(|(position, vector)| match metric {
            Metric::Cosine => {
                Neighbour { position, score: cosine_similarity(vector, query), distance: None }
            }
            Metric::L2 => {
                let distance = l2_distance(vector, query);
                Neighbour { position, score: 1.0 / (1.0 + distance), distance: Some(distance) }
            }
        })
        .collect();

    scored.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (false, false) => {
            b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then(a.position.cmp(&b.position))
        }
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => a.position.cmp(&b.position),
    });
    scored.truncate(top_k);
    scored
}

/// Retriever embedding the query and returning its nearest stored documents.
pub struct DenseRetriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_score: Option<f32>,
}

impl DenseRetriever {
    /// Create a dense retriever. The embedder must be the one the store was built with.
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder, min_score: None }
    }

    /// Drop candidates whose score is below `threshold`.
    pub fn with_min_score(mut self, threshold: Option<f32>) -> Self {
        self.min_score = threshold;
        self
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Dense
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let query = normalize_query(query)?;

        let embedding = self.embedder.embed(query).await.map_err(|e| {
            debug!(provider = self.embedder.name(), error = %e, "query embedding failed");
            e
        })?;
        let expected = self.store.manifest().dimensions;
        if embedding.len() != expected {
            return Err(RagError::EmbeddingError {
                provider: self.embedder.name().to_string(),
                message: format!(
                    "query embedding has {} dimensions, index expects {expected}",
                    embedding.len()
                ),
            });
        }

        let documents = self.store.documents();
        let candidates: Vec<Candidate> =
            nearest(self.store.vectors(), &embedding, self.store.manifest().metric, top_k)
                .into_iter()
                .filter(|n| self.min_score.is_none_or(|min| n.score >= min))
                .map(|n| Candidate {
                    document: documents[n.position].clone(),
                    score: n.score,
                    distance: n.distance,
                    strategy: Strategy::Dense,
                })
                .collect();

        debug!(strategy = "dense", result_count = candidates.len(), "dense search completed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0]];
        let ranked = nearest(&vectors, &[1.0, 0.0], Metric::Cosine, 3);
        let positions: Vec<usize> = ranked.iter().map(|n| n.position).collect();
        assert_eq!(positions, vec![0, 2, 3]);
    }

    #[test]
    fn l2_prefers_closer_vectors() {
        let vectors = vec![vec![3.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0]];
        let ranked = nearest(&vectors, &[1.0, 0.0], Metric::L2, 2);
        assert_eq!(ranked[0].position, 1);
        assert_eq!(ranked[0].distance, Some(0.0));
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[1].position, 2);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn top_k_bounds_result() {
        let vectors = vec![vec![1.0]; 5];
        assert_eq!(nearest(&vectors, &[1.0], Metric::Cosine, 2).len(), 2);
        assert_eq!(nearest(&vectors, &[1.0], Metric::Cosine, 10).len(), 5);
    }
}
