//! Gemini generation and embedding over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::config::{ApiKey, GenerationConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, http};

/// The default Generative Language API base.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/";

const PROVIDER: &str = "Gemini";

/// Finish reasons that mean the provider withheld the answer on policy grounds.
const BLOCKING_FINISH_REASONS: &[&str] =
    &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII", "RECITATION"];

fn model_path(model: &str) -> String {
    format!("models/{}", model.strip_prefix("models/").unwrap_or(model))
}

// ── Generative Language API request/response types ─────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationParams>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorInfo>,
}

#[derive(Deserialize)]
struct ErrorInfo {
    reason: Option<String>,
}

impl ErrorDetail {
    /// The message followed by the machine-readable status and reasons,
    /// e.g. `API key not valid. (INVALID_ARGUMENT, API_KEY_INVALID)`.
    fn describe(self) -> String {
        let codes: Vec<String> = self
            .status
            .into_iter()
            .chain(self.details.into_iter().filter_map(|d| d.reason))
            .collect();
        if codes.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, codes.join(", "))
        }
    }
}

impl GenerateContentResponse {
    /// Extract the first candidate's text, classifying blocked or empty answers.
    pub(crate) fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(RagError::GenerationRejected {
                provider: PROVIDER.into(),
                reason: format!("prompt blocked: {reason}"),
            });
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(RagError::MalformedResponse("response has no candidates".into()));
        };

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if BLOCKING_FINISH_REASONS.contains(&reason) {
                return Err(RagError::GenerationRejected {
                    provider: PROVIDER.into(),
                    reason: format!("response withheld: {reason}"),
                });
            }
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(RagError::MalformedResponse("response contains no text".into()));
        }
        Ok(text)
    }
}

// ── Generation client ──────────────────────────────────────────────

/// A [`GenerationClient`] calling Gemini's `generateContent`.
///
/// The API key travels in the `x-goog-api-key` header, never in the URL.
///
/// # Example
///
/// ```rust,ignore
/// use waypoint_rag::{ApiKey, GenerationConfig, GenerationProvider};
/// use waypoint_rag::gemini::GeminiClient;
///
/// let config = GenerationConfig::new(GenerationProvider::Gemini, ApiKey::from_env("GOOGLE_API_KEY")?);
/// let client = GeminiClient::new(&config)?;
/// ```
pub struct GeminiClient {
    client: Client,
    api_key: ApiKey,
    url: Url,
    model: String,
    timeout: Duration,
    temperature: Option<f32>,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = http::base_url(config.base_url.as_deref().unwrap_or(GEMINI_API_BASE))?;
        let model = model_path(&config.model_id);
        let url = base.join(&format!("{model}:generateContent")).map_err(|e| {
            RagError::ConfigError(format!("invalid model id '{}': {e}", config.model_id))
        })?;

        Ok(Self {
            client: http::client(config.timeout)?,
            api_key: config.api_key.clone(),
            url,
            model,
            timeout: config.timeout,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: prompt }] }],
            generation_config: self
                .temperature
                .map(|t| GenerationParams { temperature: Some(t) }),
        };

        let response = self
            .client
            .post(self.url.clone())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                debug!(provider = PROVIDER, error = %e, "generation request failed");
                http::transport_error(PROVIDER, self.timeout, &e)
            })?;

        let status = response.status();
        let payload =
            response.text().await.map_err(|e| http::transport_error(PROVIDER, self.timeout, &e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&payload)
                .map(|e| e.error.describe())
                .unwrap_or(payload);
            debug!(provider = PROVIDER, %status, "API error");
            return Err(http::status_error(PROVIDER, status, detail));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&payload).map_err(|e| {
            RagError::MalformedResponse(format!("failed to parse Gemini response: {e}"))
        })?;
        let text = parsed.into_text()?;
        debug!(provider = PROVIDER, response_len = text.len(), "generation completed");
        Ok(text)
    }
}

// ── Embedding provider ─────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedContentsRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Single embeddings are requested with the `RETRIEVAL_QUERY` task type and
/// batches with `RETRIEVAL_DOCUMENT`, matching how the pipeline uses them:
/// queries one at a time, documents in bulk at index time.
pub struct GeminiEmbeddingProvider {
    client: Client,
    api_key: ApiKey,
    base: Url,
    model: String,
    dimensions: usize,
    output_dimensionality: Option<usize>,
}

impl GeminiEmbeddingProvider {
    /// Default embedding model.
    pub const DEFAULT_MODEL: &'static str = "text-embedding-004";
    /// Default embedding dimensions for `text-embedding-004`.
    pub const DEFAULT_DIMENSIONS: usize = 768;
    const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(api_key: ApiKey) -> Result<Self> {
        Ok(Self {
            client: http::client(Self::TIMEOUT).map_err(embedding_error)?,
            api_key,
            base: http::base_url(GEMINI_API_BASE)?,
            model: model_path(Self::DEFAULT_MODEL),
            dimensions: Self::DEFAULT_DIMENSIONS,
            output_dimensionality: None,
        })
    }

    pub fn with_model(mut self, model: impl AsRef<str>) -> Self {
        self.model = model_path(model.as_ref());
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base = http::base_url(base_url)?;
        Ok(self)
    }

    /// Truncate output vectors to `dims`.
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    async fn post<Req: Serialize, Res: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Res> {
        let url = self
            .base
            .join(&format!("{}:{endpoint}", self.model))
            .map_err(|e| RagError::ConfigError(format!("invalid model '{}': {e}", self.model)))?;

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                debug!(provider = PROVIDER, error = %e, "embedding request failed");
                RagError::EmbeddingError { provider: PROVIDER.into(), message: format!("{e}") }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.describe())
                .unwrap_or(body);
            debug!(provider = PROVIDER, %status, "embedding API error");
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("API returned {status}: {detail}"),
            });
        }

        response.json().await.map_err(|e| RagError::EmbeddingError {
            provider: PROVIDER.into(),
            message: format!("failed to parse response: {e}"),
        })
    }
}

fn embedding_error(err: RagError) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: err.to_string() }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding query");
        let request = EmbedContentRequest {
            model: None,
            content: Content { role: None, parts: vec![Part { text }] },
            task_type: "RETRIEVAL_QUERY",
            output_dimensionality: self.output_dimensionality,
        };
        let response: EmbedContentResponse = self.post("embedContent", &request).await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), "embedding batch");

        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: Some(self.model.as_str()),
                    content: Content { role: None, parts: vec![Part { text }] },
                    task_type: "RETRIEVAL_DOCUMENT",
                    output_dimensionality: self.output_dimensionality,
                })
                .collect(),
        };
        let response: BatchEmbedContentsResponse =
            self.post("batchEmbedContents", &request).await?;
        if response.embeddings.len() != texts.len() {
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!(
                    "requested {} embeddings, received {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            });
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        self.model.strip_prefix("models/").unwrap_or(&self.model)
    }
}
