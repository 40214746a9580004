//! Hybrid retrieval: merge dense and lexical rankings with one fixed policy.
//!
//! The policy is chosen when the pipeline is built and applied to every
//! query. Two policies are available:
//!
//! - [`FusionPolicy::ReciprocalRank`] sums `1 / (k + rank)` over both
//!   rankings (rank starts at 1). Only ranks matter, so the very different
//!   scales of cosine similarity and BM25 do not need reconciling.
//! - [`FusionPolicy::Weighted`] min-max normalises each ranking's scores to
//!   `[0, 1]` and combines them as `w * dense + (1 - w) * lexical`.
//!
//! Both retrievers are asked for twice the requested size so documents just
//! outside one ranking's cut can still be lifted by the other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{Candidate, Strategy};
use crate::error::{RagError, Result};
use crate::retriever::{Retriever, normalize_query};

/// How dense and lexical rankings are merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Reciprocal rank fusion with smoothing constant `k`.
    ReciprocalRank { k: f32 },
    /// Weighted sum of min-max normalised scores.
    Weighted { dense_weight: f32 },
}

impl FusionPolicy {
    pub const DEFAULT_RRF_K: f32 = 60.0;
    pub const DEFAULT_DENSE_WEIGHT: f32 = 0.5;

    pub fn validate(&self) -> Result<()> {
        match *self {
            FusionPolicy::ReciprocalRank { k } if !(k.is_finite() && k >= 0.0) => Err(
                RagError::ConfigError(format!("rrf k must be a non-negative number, got {k}")),
            ),
            FusionPolicy::Weighted { dense_weight }
                if !(0.0..=1.0).contains(&dense_weight) =>
            {
                Err(RagError::ConfigError(format!(
                    "dense weight must be within 0.0..=1.0, got {dense_weight}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Merge two rankings into one, best first, at most `top_k` long.
    ///
    /// Ties are broken by the best rank the document held in either list,
    /// then by dense rank, so the output is fully determined by the inputs.
    pub fn fuse(&self, dense: &[Candidate], lexical: &[Candidate], top_k: usize) -> Vec<Candidate> {
        struct Entry {
            candidate: Candidate,
            score: f32,
            best_rank: usize,
            dense_rank: usize,
        }

        let dense_scores = self.contributions(dense, true);
        let lexical_scores = self.contributions(lexical, false);

        let mut entries: Vec<Entry> = Vec::with_capacity(dense.len() + lexical.len());
        let mut index: HashMap<&str, usize> = HashMap::new();

        for (list, scores, is_dense) in
            [(dense, &dense_scores, true), (lexical, &lexical_scores, false)]
        {
            for (rank, (candidate, contribution)) in list.iter().zip(scores.iter()).enumerate() {
                match index.get(candidate.document.id.as_str()) {
                    Some(&slot) => {
                        let entry = &mut entries[slot];
                        entry.score += contribution;
                        entry.best_rank = entry.best_rank.min(rank);
                    }
                    None => {
                        index.insert(candidate.document.id.as_str(), entries.len());
                        entries.push(Entry {
                            candidate: candidate.clone(),
                            score: *contribution,
                            best_rank: rank,
                            dense_rank: if is_dense { rank } else { usize::MAX },
                        });
                    }
                }
            }
        }

        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.best_rank.cmp(&b.best_rank))
                .then(a.dense_rank.cmp(&b.dense_rank))
        });

        entries
            .into_iter()
            .take(top_k)
            .map(|entry| Candidate {
                document: entry.candidate.document,
                score: entry.score,
                distance: None,
                strategy: Strategy::Hybrid,
            })
            .collect()
    }

    fn contributions(&self, list: &[Candidate], is_dense: bool) -> Vec<f32> {
        match *self {
            FusionPolicy::ReciprocalRank { k } => {
                (0..list.len()).map(|rank| 1.0 / (k + rank as f32 + 1.0)).collect()
            }
            FusionPolicy::Weighted { dense_weight } => {
                let weight = if is_dense { dense_weight } else { 1.0 - dense_weight };
                let (min, max) = list.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                    (lo.min(c.score), hi.max(c.score))
                });
                list.iter()
                    .map(|c| {
                        let normalised = if max > min { (c.score - min) / (max - min) } else { 1.0 };
                        weight * normalised
                    })
                    .collect()
            }
        }
    }
}

impl Default for FusionPolicy {
    fn default() -> Self {
        FusionPolicy::ReciprocalRank { k: Self::DEFAULT_RRF_K }
    }
}

/// Retriever running a dense and a lexical retriever and fusing their rankings.
pub struct HybridRetriever {
    dense: Arc<dyn Retriever>,
    lexical: Arc<dyn Retriever>,
    policy: FusionPolicy,
}

impl HybridRetriever {
    pub fn new(dense: Arc<dyn Retriever>, lexical: Arc<dyn Retriever>, policy: FusionPolicy) -> Self {
        Self { dense, lexical, policy }
    }

    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Hybrid
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let query = normalize_query(query)?;
        let fetch = top_k.saturating_mul(2);

        let dense = self.dense.retrieve(query, fetch).await?;
        let lexical = self.lexical.retrieve(query, fetch).await?;
        let fused = self.policy.fuse(&dense, &lexical, top_k);

        debug!(
            strategy = "hybrid",
            dense_count = dense.len(),
            lexical_count = lexical.len(),
            result_count = fused.len(),
            "hybrid search completed"
        );
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn ranked(ids: &[&str], strategy: Strategy) -> Vec<Candidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Candidate::new(Document::new(*id, "text"), 10.0 - i as f32, strategy))
            .collect()
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.document.id.as_str()).collect()
    }

    #[test]
    fn rrf_rewards_agreement() {
        let dense = ranked(&["a", "b", "c"], Strategy::Dense);
        let lexical = ranked(&["b", "d", "e"], Strategy::Lexical);
        let fused = FusionPolicy::default().fuse(&dense, &lexical, 10);
        // b appears in both lists and overtakes a, which leads only one.
        // c and e tie on rank; c wins because it came from the dense list.
        assert_eq!(ids(&fused), vec!["b", "a", "d", "c", "e"]);
        assert!(fused.iter().all(|c| c.strategy == Strategy::Hybrid));
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn rrf_ties_prefer_dense_rank() {
        let dense = ranked(&["a"], Strategy::Dense);
        let lexical = ranked(&["z"], Strategy::Lexical);
        let fused = FusionPolicy::default().fuse(&dense, &lexical, 2);
        assert_eq!(ids(&fused), vec!["a", "z"]);
    }

    #[test]
    fn weighted_respects_dense_weight() {
        let dense = ranked(&["a", "b"], Strategy::Dense);
        let lexical = ranked(&["b", "a"], Strategy::Lexical);
        let dense_heavy = FusionPolicy::Weighted { dense_weight: 0.9 }.fuse(&dense, &lexical, 2);
        assert_eq!(ids(&dense_heavy), vec!["a", "b"]);
        let lexical_heavy = FusionPolicy::Weighted { dense_weight: 0.1 }.fuse(&dense, &lexical, 2);
        assert_eq!(ids(&lexical_heavy), vec!["b", "a"]);
    }

    #[test]
    fn fuse_truncates_to_top_k() {
        let dense = ranked(&["a", "b", "c"], Strategy::Dense);
        let fused = FusionPolicy::default().fuse(&dense, &[], 2);
        assert_eq!(ids(&fused), vec!["a", "b"]);
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        assert!(FusionPolicy::Weighted { dense_weight: 1.5 }.validate().is_err());
        assert!(FusionPolicy::ReciprocalRank { k: -1.0 }.validate().is_err());
        assert!(FusionPolicy::default().validate().is_ok());
    }
}
