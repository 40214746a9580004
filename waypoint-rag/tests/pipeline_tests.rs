//! End-to-end tests for the recommendation pipeline.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use waypoint_rag::document::{Document, Strategy};
use waypoint_rag::embedding::{EmbeddingProvider, HashingEmbedder};
use waypoint_rag::error::{ErrorKind, RagError, Result};
use waypoint_rag::generation::GenerationClient;
use waypoint_rag::ingest::{IndexBuilder, read_documents_jsonl};
use waypoint_rag::pipeline::RecommendationPipeline;
use waypoint_rag::store::{DocumentStore, Metric};
use waypoint_rag::{ApiKey, GenerationConfig, GenerationProvider, PipelineConfig};

const ATTRACTIONS: &str = r#"{"id": "eg-sahl", "text": "Quiet sandy beach with calm turquoise water and coral reefs.", "metadata": {"name": "Sahl Hasheesh", "country": "Egypt", "category": "beach", "rating": 4.7}}
{"id": "eg-giza", "text": "The pyramids and the Sphinx on the edge of Cairo.", "metadata": {"name": "Giza Plateau", "country": "Egypt", "category": "historical site", "rating": 4.8}}
{"id": "es-costa", "text": "Long beach promenade with lively nightlife.", "metadata": {"name": "Costa del Sol", "country": "Spain", "category": "beach", "rating": 4.4}}
{"id": "jp-kyoto", "text": "Temples, gardens and traditional tea houses.", "metadata": {"name": "Kyoto", "country": "Japan", "category": "city", "rating": 4.9}}
"#;

/// A generator replying with a fixed, tagged answer and recording prompts.
struct ScriptedGenerator {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

async fn build_index(dir: &std::path::Path) -> Arc<DocumentStore> {
    let input = dir.join("attractions.jsonl");
    tokio::fs::write(&input, ATTRACTIONS).await.unwrap();
    let documents = read_documents_jsonl(&input).await.unwrap();
    let index_dir = dir.join("index");
    IndexBuilder::new()
        .build(&documents, &HashingEmbedder::default(), Metric::Cosine, &index_dir)
        .await
        .unwrap();
    Arc::new(DocumentStore::load(&index_dir).await.unwrap())
}

#[tokio::test]
async fn egypt_beach_query_yields_clean_answer() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_index(dir.path()).await;
    let generator = Arc::new(ScriptedGenerator {
        reply: "<greeting>\nHello, sun seeker!\n</greeting>\n\n<recommendations>\n\
                1.  Sahl Hasheesh, Egypt: calm water.\n2.Giza Plateau, Egypt: pyramids.\n\
                3. Costa del Sol, Spain: nightlife.\n</recommendations>\n\n\
                <conclusion>\nHave a great trip!\n</conclusion>"
            .to_string(),
        prompts: Mutex::new(Vec::new()),
    });

    for strategy in [Strategy::Dense, Strategy::Lexical, Strategy::Hybrid] {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::default());
        let pipeline = RecommendationPipeline::builder()
            .config(PipelineConfig::builder().strategy(strategy).top_k(3).build().unwrap())
            .store(store.clone())
            .embedder(embedder)
            .generator(generator.clone())
            .build()
            .unwrap();

        let answer = pipeline.answer("beach destinations in Egypt").await.unwrap();
        assert!(!answer.is_empty());
        for marker in ["<greeting>", "</greeting>", "<recommendations>", "</conclusion>"] {
            assert!(!answer.contains(marker), "{strategy}: marker {marker} left in answer");
        }
        assert!(answer.contains("\n\n1. Sahl Hasheesh"));
        assert!(answer.contains("\n\n2. Giza Plateau"));
    }

    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 3);
    for prompt in prompts.iter() {
        assert!(prompt.contains("[1] id: eg-sahl"), "Egypt beach should rank first:\n{prompt}");
    }
}

#[tokio::test]
async fn missing_index_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = DocumentStore::load(dir.path().join("no-such-index")).await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::IndexUnavailable);
}

#[tokio::test]
async fn corrupt_index_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_index(dir.path()).await;
    let vectors = store.root().join("vectors.jsonl");
    tokio::fs::write(&vectors, "{\"id\": \"eg-sahl\", \"embedding\": [0.5]}\n").await.unwrap();

    let err = DocumentStore::load(store.root()).await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
}

#[tokio::test]
async fn index_round_trip_preserves_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_index(dir.path()).await;

    let ids: Vec<&str> = store.documents().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["eg-sahl", "eg-giza", "es-costa", "jp-kyoto"]);
    assert_eq!(store.manifest().embedder, HashingEmbedder::NAME);
    assert_eq!(store.manifest().dimensions, HashingEmbedder::DEFAULT_DIMENSIONS);
    assert_eq!(store.documents()[0].metadata_str("country").as_deref(), Some("Egypt"));
    store.check_embedder(&HashingEmbedder::default()).unwrap();
}

#[tokio::test]
async fn index_built_with_other_embedder_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_index(dir.path()).await;
    let other: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(64));
    let err = RecommendationPipeline::builder()
        .config(PipelineConfig::builder().strategy(Strategy::Dense).build().unwrap())
        .store(store)
        .embedder(other)
        .generator(Arc::new(ScriptedGenerator { reply: String::new(), prompts: Mutex::new(vec![]) }))
        .build()
        .unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
}

/// Accepts connections and never answers, counting how many arrive.
async fn silent_server() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    (format!("http://{addr}/v1beta"), accepted)
}

#[cfg(feature = "gemini")]
#[tokio::test]
async fn generation_timeout_surfaces_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_index(dir.path()).await;
    let (base_url, accepted) = silent_server().await;

    let timeout = Duration::from_millis(250);
    let config = GenerationConfig::new(GenerationProvider::Gemini, ApiKey::new("test-key").unwrap())
        .with_base_url(base_url)
        .with_timeout(timeout);
    let generator = waypoint_rag::build_generation_client(&config).unwrap();

    let pipeline = RecommendationPipeline::builder()
        .config(PipelineConfig::builder().strategy(Strategy::Lexical).top_k(2).build().unwrap())
        .store(store)
        .generator(generator)
        .build()
        .unwrap();

    let started = Instant::now();
    let err = pipeline.answer("beach destinations in Egypt").await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        RagError::GenerationTimeout { timeout: reported, .. } => assert_eq!(reported, timeout),
        other => panic!("expected GenerationTimeout, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 1, "request must not be retried");
}

#[cfg(feature = "openai")]
#[tokio::test]
async fn unreachable_provider_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = GenerationConfig::new(GenerationProvider::OpenAI, ApiKey::new("test-key").unwrap())
        .with_base_url(format!("http://{addr}/v1"))
        .with_timeout(Duration::from_secs(2));
    let client = waypoint_rag::build_generation_client(&config).unwrap();
    let err = client.generate("hello").await.unwrap_err();
    assert!(matches!(err, RagError::GenerationUnavailable { .. }), "got {err:?}");
}
