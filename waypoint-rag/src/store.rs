//! The read-only document store loaded from an index directory.
//!
//! An index directory holds three files:
//!
//! - `manifest.json` – metric, dimensions and the embedder that built it
//! - `docstore.jsonl` – one [`Document`] per line, in insertion order
//! - `vectors.jsonl` – one `{ "id", "embedding" }` per line, same order
//!
//! The store is loaded once, fully, before the first query and is never
//! mutated afterwards, so one `Arc<DocumentStore>` can serve any number of
//! concurrent retrievals.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::lexical::{Analyzer, Bm25Index};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOCSTORE_FILE: &str = "docstore.jsonl";
pub const VECTORS_FILE: &str = "vectors.jsonl";

/// Current on-disk format version.
pub const INDEX_VERSION: u32 = 1;

/// Distance metric the dense index was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::L2 => f.write_str("l2"),
        }
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(RagError::ConfigError(format!(
                "unknown metric '{other}' (expected cosine or l2)"
            ))),
        }
    }
}

/// Describes how an index directory was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub version: u32,
    pub metric: Metric,
    pub dimensions: usize,
    pub embedder: String,
    pub embedding_model: String,
    pub document_count: usize,
}

/// One line of `vectors.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Documents, their embeddings, and the lexical index derived from them.
pub struct DocumentStore {
    root: PathBuf,
    manifest: IndexManifest,
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
    analyzer: Analyzer,
    lexical: Bm25Index,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("root", &self.root)
            .field("manifest", &self.manifest)
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl DocumentStore {
    /// Load an index directory.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] if the directory or any of its
    /// files is missing or unreadable, a line fails to parse, or the contents
    /// are inconsistent (duplicate ids, empty text, vectors out of step with
    /// documents, wrong vector length).
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !tokio::fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(RagError::index(&root, "index directory does not exist"));
        }

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest: IndexManifest = serde_json::from_str(&read(&manifest_path).await?)
            .map_err(|e| RagError::index(&manifest_path, format!("invalid manifest: {e}")))?;
        if manifest.version != INDEX_VERSION {
            return Err(RagError::index(
                &manifest_path,
                format!("unsupported index version {} (expected {INDEX_VERSION})", manifest.version),
            ));
        }

        let docstore_path = root.join(DOCSTORE_FILE);
        let documents: Vec<Document> = parse_jsonl(&docstore_path, &read(&docstore_path).await?)?;

        let vectors_path = root.join(VECTORS_FILE);
        let records: Vec<VectorRecord> = parse_jsonl(&vectors_path, &read(&vectors_path).await?)?;

        let store = Self::assemble(root, manifest, documents, records)?;
        info!(
            path = %store.root.display(),
            documents = store.documents.len(),
            metric = %store.manifest.metric,
            embedder = %store.manifest.embedder,
            "loaded document store"
        );
        Ok(store)
    }

    /// Build a store directly from in-memory parts, applying the same checks as [`load`](Self::load).
    pub fn from_parts(
        manifest: IndexManifest,
        documents: Vec<Document>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let records = documents
            .iter()
            .zip(embeddings)
            .map(|(doc, embedding)| VectorRecord { id: doc.id.clone(), embedding })
            .collect();
        Self::assemble(PathBuf::from("<memory>"), manifest, documents, records)
    }

    fn assemble(
        root: PathBuf,
        manifest: IndexManifest,
        documents: Vec<Document>,
        records: Vec<VectorRecord>,
    ) -> Result<Self> {
        if documents.len() != records.len() {
            return Err(RagError::index(
                &root,
                format!("{} documents but {} vectors", documents.len(), records.len()),
            ));
        }
        if manifest.document_count != documents.len() {
            return Err(RagError::index(
                &root,
                format!(
                    "manifest lists {} documents but docstore has {}",
                    manifest.document_count,
                    documents.len()
                ),
            ));
        }

        let mut seen = HashSet::with_capacity(documents.len());
        let mut vectors = Vec::with_capacity(records.len());
        for (doc, record) in documents.iter().zip(records) {
            if !seen.insert(doc.id.as_str()) {
                return Err(RagError::index(&root, format!("duplicate document id '{}'", doc.id)));
            }
            if doc.text.trim().is_empty() {
                return Err(RagError::index(&root, format!("document '{}' has empty text", doc.id)));
            }
            if record.id != doc.id {
                return Err(RagError::index(
                    &root,
                    format!("vector '{}' does not match document '{}'", record.id, doc.id),
                ));
            }
            if record.embedding.len() != manifest.dimensions {
                return Err(RagError::index(
                    &root,
                    format!(
                        "vector for '{}' has {} dimensions, manifest says {}",
                        doc.id,
                        record.embedding.len(),
                        manifest.dimensions
                    ),
                ));
            }
            vectors.push(record.embedding);
        }

        let analyzer = Analyzer::english();
        let tokenized: Vec<Vec<String>> =
            documents.iter().map(|d| analyzer.tokenize(&d.searchable_text())).collect();
        let lexical = Bm25Index::build(&tokenized);
        debug!(documents = documents.len(), "built lexical index");

        Ok(Self { root, manifest, documents, vectors, analyzer, lexical })
    }

    /// Fail unless `provider` is the embedder this index was built with.
    pub fn check_embedder(&self, provider: &dyn EmbeddingProvider) -> Result<()> {
        let manifest = &self.manifest;
        if provider.name() != manifest.embedder || provider.model() != manifest.embedding_model {
            return Err(RagError::index(
                &self.root,
                format!(
                    "index was built with {}/{} but the configured embedder is {}/{}",
                    manifest.embedder,
                    manifest.embedding_model,
                    provider.name(),
                    provider.model()
                ),
            ));
        }
        if provider.dimensions() != manifest.dimensions {
            return Err(RagError::index(
                &self.root,
                format!(
                    "index has {} dimensions but the embedder produces {}",
                    manifest.dimensions,
                    provider.dimensions()
                ),
            ));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Embeddings aligned with [`documents`](Self::documents).
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn lexical_index(&self) -> &Bm25Index {
        &self.lexical
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| RagError::index(path, e.to_string()))
}

fn parse_jsonl<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<Vec<T>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| RagError::index(path, format!("line {}: {e}", n + 1)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(count: usize, dimensions: usize) -> IndexManifest {
        IndexManifest {
            version: INDEX_VERSION,
            metric: Metric::Cosine,
            dimensions,
            embedder: "hashing".into(),
            embedding_model: "fnv1a-stemmed-v1".into(),
            document_count: count,
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let docs = vec![Document::new("a", "one"), Document::new("a", "two")];
        let err = DocumentStore::from_parts(manifest(2, 2), docs, vec![vec![1.0, 0.0]; 2])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate document id 'a'"));
    }

    #[test]
    fn rejects_empty_text() {
        let docs = vec![Document::new("a", "   ")];
        let err = DocumentStore::from_parts(manifest(1, 2), docs, vec![vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable { .. }));
    }

    #[test]
    fn rejects_wrong_dimensions() {
        let docs = vec![Document::new("a", "text")];
        let err = DocumentStore::from_parts(manifest(1, 3), docs, vec![vec![1.0, 0.0]]).unwrap_err();
        assert!(err.to_string().contains("2 dimensions"));
    }

    #[tokio::test]
    async fn missing_directory_is_index_unavailable() {
        let err = DocumentStore::load("/definitely/not/a/waypoint/index").await.unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable { .. }));
    }

    #[test]
    fn metric_parses() {
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert!("dot".parse::<Metric>().is_err());
    }
}
