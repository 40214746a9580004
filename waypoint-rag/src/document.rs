//! Data types for attraction documents and retrieval candidates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An attraction record with descriptive text and free-form metadata.
///
/// Metadata keys are not a fixed schema: `country`, `city`, `category`,
/// `price`, `rating`, `coordinates` and `source_url` are common, but any key
/// may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document, assigned at ingestion.
    pub id: String,
    /// The descriptive text of the attraction.
    pub text: String,
    /// Key-value metadata, kept in key order so serialization is stable.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: BTreeMap::new() }
    }

    /// Add a metadata attribute.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata attribute rendered as display text.
    ///
    /// Returns `None` for absent keys and JSON `null`.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata.get(key).and_then(value_to_text)
    }

    /// The text used for lexical indexing and embedding: metadata values in
    /// key order followed by the document text.
    pub fn searchable_text(&self) -> String {
        let mut out = String::new();
        for value in self.metadata.values() {
            if let Some(text) = value_to_text(value) {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out.push_str(&self.text);
        out
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_text).collect();
            Some(parts.join(", "))
        }
        other => Some(other.to_string()),
    }
}

/// The retrieval strategy that produced a [`Candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Nearest neighbours over vector embeddings.
    Dense,
    /// BM25 scoring over stemmed tokens.
    Lexical,
    /// Fusion of dense and lexical rankings.
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Dense => "dense",
            Strategy::Lexical => "lexical",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved [`Document`] paired with a relevance score for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// The retrieved document.
    pub document: Document,
    /// The relevance score (higher is more relevant).
    pub score: f32,
    /// Raw distance for L2 dense retrieval, where `score` is `1 / (1 + distance)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// The strategy that produced this candidate.
    pub strategy: Strategy,
}

impl Candidate {
    pub fn new(document: Document, score: f32, strategy: Strategy) -> Self {
        Self { document, score, distance: None, strategy }
    }
}
