//! Building an index directory from raw attraction records.
//!
//! Input is JSON lines of `{ "id"?, "text", "metadata"? }`. The output is
//! the directory layout [`DocumentStore::load`](crate::store::DocumentStore::load)
//! reads back.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::store::{
    DOCSTORE_FILE, INDEX_VERSION, IndexManifest, MANIFEST_FILE, Metric, VECTORS_FILE, VectorRecord,
};

#[derive(Deserialize)]
struct RawDocument {
    id: Option<String>,
    text: String,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

/// Read documents from a JSON-lines file.
///
/// Lines that fail to decode are skipped with a warning. Records without an
/// id get a random UUID.
///
/// # Errors
///
/// Returns [`RagError::IndexUnavailable`] if the file cannot be read.
pub async fn read_documents_jsonl(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RagError::index(path, format!("cannot read input: {e}")))?;
    Ok(parse_documents(&content, path))
}

fn parse_documents(content: &str, path: &Path) -> Vec<Document> {
    let mut documents = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawDocument>(line) {
            Ok(raw) => {
                let id = raw
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                documents.push(Document { id, text: raw.text, metadata: raw.metadata });
            }
            Err(e) => {
                warn!(path = %path.display(), line = n + 1, error = %e, "skipping undecodable record");
            }
        }
    }
    documents
}

/// Embeds documents and writes an index directory.
pub struct IndexBuilder {
    batch_size: usize,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self { batch_size: Self::DEFAULT_BATCH_SIZE }
    }
}

impl IndexBuilder {
    pub const DEFAULT_BATCH_SIZE: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents per `embed_batch` call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embed `documents` and write `manifest.json`, `docstore.jsonl` and
    /// `vectors.jsonl` into `out_dir`, creating it if needed.
    ///
    /// Each document is embedded from its searchable text, so metadata such
    /// as country and category contributes to dense matches too.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] for an empty input, duplicate ids or empty text.
    /// - [`RagError::EmbeddingError`] if the provider fails or returns
    ///   vectors of the wrong shape.
    /// - [`RagError::IndexUnavailable`] if the directory cannot be written.
    pub async fn build(
        &self,
        documents: &[Document],
        embedder: &dyn EmbeddingProvider,
        metric: Metric,
        out_dir: impl AsRef<Path>,
    ) -> Result<IndexManifest> {
        let out_dir = out_dir.as_ref();
        validate_documents(documents)?;

        let texts: Vec<String> = documents.iter().map(Document::searchable_text).collect();
        let mut embeddings = Vec::with_capacity(documents.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let vectors = embedder.embed_batch(&refs).await?;
            if vectors.len() != refs.len() {
                return Err(RagError::EmbeddingError {
                    provider: embedder.name().to_string(),
                    message: format!("batch of {} returned {} vectors", refs.len(), vectors.len()),
                });
            }
            debug!(batch = batch_no, size = refs.len(), "embedded batch");
            embeddings.extend(vectors);
        }

        let dimensions = embedder.dimensions();
        if let Some((doc, vector)) =
            documents.iter().zip(&embeddings).find(|(_, v)| v.len() != dimensions)
        {
            return Err(RagError::EmbeddingError {
                provider: embedder.name().to_string(),
                message: format!(
                    "embedding for '{}' has {} dimensions, provider reports {dimensions}",
                    doc.id,
                    vector.len()
                ),
            });
        }

        let manifest = IndexManifest {
            version: INDEX_VERSION,
            metric,
            dimensions,
            embedder: embedder.name().to_string(),
            embedding_model: embedder.model().to_string(),
            document_count: documents.len(),
        };

        let mut docstore = String::new();
        let mut vectors = String::new();
        for (doc, embedding) in documents.iter().zip(embeddings) {
            docstore.push_str(&to_line(out_dir, doc)?);
            let record = VectorRecord { id: doc.id.clone(), embedding };
            vectors.push_str(&to_line(out_dir, &record)?);
        }
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| RagError::index(out_dir, format!("cannot encode manifest: {e}")))?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| RagError::index(out_dir, format!("cannot create directory: {e}")))?;
        // A previous build's manifest must not vouch for half-written files.
        let manifest_path = out_dir.join(MANIFEST_FILE);
        match tokio::fs::remove_file(&manifest_path).await {
            Ok(()) => debug!(path = %manifest_path.display(), "removed previous manifest"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RagError::index(&manifest_path, e.to_string())),
        }
        write(&out_dir.join(DOCSTORE_FILE), docstore).await?;
        write(&out_dir.join(VECTORS_FILE), vectors).await?;
        write(&manifest_path, manifest_json).await?;

        info!(
            path = %out_dir.display(),
            documents = manifest.document_count,
            dimensions,
            metric = %metric,
            embedder = %manifest.embedder,
            "built index"
        );
        Ok(manifest)
    }
}

fn validate_documents(documents: &[Document]) -> Result<()> {
    if documents.is_empty() {
        return Err(RagError::ConfigError("no documents to index".to_string()));
    }
    let mut seen = HashSet::with_capacity(documents.len());
    for doc in documents {
        if !seen.insert(doc.id.as_str()) {
            return Err(RagError::ConfigError(format!("duplicate document id '{}'", doc.id)));
        }
        if doc.text.trim().is_empty() {
            return Err(RagError::ConfigError(format!("document '{}' has empty text", doc.id)));
        }
    }
    Ok(())
}

fn to_line<T: serde::Serialize>(out_dir: &Path, value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)
        .map_err(|e| RagError::index(out_dir, format!("cannot encode record: {e}")))?;
    line.push('\n');
    Ok(line)
}

async fn write(path: &Path, contents: String) -> Result<()> {
    tokio::fs::write(path, contents).await.map_err(|e| RagError::index(path, e.to_string()))
}
