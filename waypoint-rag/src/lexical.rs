//! Lexical retrieval: text analysis and BM25 scoring.
//!
//! The same [`Analyzer`] tokenizes documents when the index is built and
//! queries when it is searched, so stemming and stopword treatment always
//! agree on both sides.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rust_stemmers::{Algorithm, Stemmer};
use tracing::debug;

use crate::document::{Candidate, Strategy};
use crate::error::Result;
use crate::retriever::{Retriever, normalize_query};
use crate::store::DocumentStore;

/// English stopwords removed before stemming.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Lowercases, splits on non-alphanumeric characters, drops English
/// stopwords and applies the Snowball English stemmer.
pub struct Analyzer {
    stemmer: Stemmer,
    stopwords: HashSet<&'static str>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::english()
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer").field("language", &"english").finish()
    }
}

impl Analyzer {
    pub fn english() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    /// Produce the stemmed terms of `text` in order of appearance.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .filter(|word| !self.stopwords.contains(word.as_str()))
            .map(|word| self.stemmer.stem(&word).into_owned())
            .collect()
    }
}

/// An inverted index scored with the Lucene variant of BM25.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    /// term → (document position, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub const DEFAULT_K1: f32 = 1.5;
    pub const DEFAULT_B: f32 = 0.75;

    /// Build an index over already-tokenized documents, in store order.
    pub fn build(tokenized_docs: &[Vec<String>]) -> Self {
        Self::with_params(tokenized_docs, Self::DEFAULT_K1, Self::DEFAULT_B)
    }

    pub fn with_params(tokenized_docs: &[Vec<String>], k1: f32, b: f32) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(tokenized_docs.len());

        for (position, tokens) in tokenized_docs.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);
            let mut frequencies: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token.as_str()).or_default() += 1;
            }
            for (term, tf) in frequencies {
                postings.entry(term.to_string()).or_default().push((position, tf));
            }
        }

        let total: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_doc_length =
            if doc_lengths.is_empty() { 0.0 } else { total as f32 / doc_lengths.len() as f32 };

        Self { postings, doc_lengths, avg_doc_length, k1, b }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    fn idf(&self, document_frequency: usize) -> f32 {
        let n = self.doc_lengths.len() as f32;
        let df = document_frequency as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score every document sharing at least one term with the query.
    ///
    /// Results are ordered by descending score, then by store position.
    /// Repeated query terms count once. Terms are summed in sorted order so
    /// identical queries produce bit-identical scores.
    pub fn search(&self, query_terms: &[String]) -> Vec<(usize, f32)> {
        let unique: BTreeSet<&str> = query_terms.iter().map(String::as_str).collect();
        let mut scores: HashMap<usize, f32> = HashMap::new();

        for term in unique {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for &(position, tf) in postings {
                let tf = tf as f32;
                let length_ratio = if self.avg_doc_length > 0.0 {
                    self.doc_lengths[position] as f32 / self.avg_doc_length
                } else {
                    0.0
                };
                let norm = self.k1 * (1.0 - self.b + self.b * length_ratio);
                *scores.entry(position).or_default() += idf * (tf * (self.k1 + 1.0)) / (tf + norm);
            }
        }

        let mut ranked: Vec<(usize, f32)> =
            scores.into_iter().filter(|(_, score)| *score > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }
}

/// Retriever scoring documents with BM25 over the store's lexical index.
pub struct LexicalRetriever {
    store: Arc<DocumentStore>,
    min_score: Option<f32>,
}

impl LexicalRetriever {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store, min_score: None }
    }

    /// Drop candidates whose BM25 score is below `threshold`.
    pub fn with_min_score(mut self, threshold: Option<f32>) -> Self {
        self.min_score = threshold;
        self
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Lexical
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let query = normalize_query(query)?;
        let terms = self.store.analyzer().tokenize(query);
        if terms.is_empty() {
            debug!(strategy = "lexical", "query has no indexable terms");
            return Ok(Vec::new());
        }

        let candidates: Vec<Candidate> = self
            .store
            .lexical_index()
            .search(&terms)
            .into_iter()
            .filter(|(_, score)| self.min_score.is_none_or(|min| *score >= min))
            .take(top_k)
            .map(|(position, score)| {
                Candidate::new(self.store.documents()[position].clone(), score, Strategy::Lexical)
            })
            .collect();

        debug!(strategy = "lexical", terms = terms.len(), result_count = candidates.len(), "lexical search completed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_stems_and_drops_stopwords() {
        let analyzer = Analyzer::english();
        assert_eq!(analyzer.tokenize("The Beaches of Egypt!"), vec!["beach", "egypt"]);
        assert_eq!(analyzer.tokenize("running, runs"), vec!["run", "run"]);
        assert!(analyzer.tokenize("  ...  ").is_empty());
        assert!(analyzer.tokenize("what is the").is_empty());
    }

    #[test]
    fn rarer_terms_score_higher() {
        let analyzer = Analyzer::english();
        let docs: Vec<Vec<String>> = [
            "beach resort with sand",
            "mountain resort with snow",
            "city resort with museums",
        ]
        .iter()
        .map(|t| analyzer.tokenize(t))
        .collect();
        let index = Bm25Index::build(&docs);

        let ranked = index.search(&analyzer.tokenize("beach resort"));
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, 0);
        assert!(ranked[0].1 > ranked[1].1);
        // The two resort-only documents tie and keep store order.
        assert_eq!(ranked[1].0, 1);
        assert_eq!(ranked[2].0, 2);
    }

    #[test]
    fn unmatched_query_returns_nothing() {
        let analyzer = Analyzer::english();
        let docs = vec![analyzer.tokenize("desert safari")];
        let index = Bm25Index::build(&docs);
        assert!(index.search(&analyzer.tokenize("glacier")).is_empty());
    }

    #[test]
    fn repeated_query_terms_count_once() {
        let analyzer = Analyzer::english();
        let docs = vec![analyzer.tokenize("beach"), analyzer.tokenize("harbour")];
        let index = Bm25Index::build(&docs);
        let once = index.search(&analyzer.tokenize("beach"));
        let twice = index.search(&analyzer.tokenize("beach beach"));
        assert_eq!(once, twice);
    }
}
