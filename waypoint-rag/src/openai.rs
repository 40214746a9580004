//! OpenAI chat generation and embeddings.
//!
//! Both clients speak the OpenAI REST dialect, so they also work against
//! compatible servers through a custom base URL.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::config::{ApiKey, GenerationConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, http};

/// The default OpenAI API base.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";

const PROVIDER: &str = "OpenAI";

/// The default model for OpenAI embeddings.
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Uses `reqwest` to call the `/v1/embeddings` endpoint directly.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use waypoint_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?;
/// let embedding = provider.embed("quiet beaches in Egypt").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: ApiKey,
    url: Url,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider with the given API key.
    ///
    /// Uses the default model (`text-embedding-3-small`) and dimensions (1536).
    pub fn new(api_key: ApiKey) -> Result<Self> {
        Ok(Self {
            client: http::client(Duration::from_secs(30))?,
            api_key,
            url: embeddings_url(&http::base_url(OPENAI_API_BASE)?)?,
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(ApiKey::from_env("OPENAI_API_KEY")?)
    }

    /// Point the provider at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.url = embeddings_url(&http::base_url(base_url)?)?;
        Ok(self)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    ///
    /// When set, the API returns embeddings truncated to this size.
    /// This also updates the value returned by [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

fn embeddings_url(base: &Url) -> Result<Url> {
    base.join("embeddings")
        .map_err(|e| RagError::ConfigError(format!("invalid embeddings URL: {e}")))
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    code: Option<String>,
}

impl ErrorDetail {
    fn describe(self) -> String {
        match self.code {
            Some(code) => format!("{} ({code})", self.message),
            None => self.message,
        }
    }
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: PROVIDER.into(),
            message: "API returned empty response".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(self.api_key.expose())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                debug!(provider = PROVIDER, error = %e, "request failed");
                RagError::EmbeddingError {
                    provider: PROVIDER.into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.describe())
                .unwrap_or(body);

            debug!(provider = PROVIDER, %status, "API error");
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("API returned {status}: {detail}"),
            });
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            debug!(provider = PROVIDER, error = %e, "failed to parse response");
            RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        if embedding_response.data.len() != texts.len() {
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!(
                    "requested {} embeddings, received {}",
                    texts.len(),
                    embedding_response.data.len()
                ),
            });
        }
        Ok(embedding_response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── Chat completions ───────────────────────────────────────────────

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl ChatResponse {
    /// Extract the first choice's content, classifying refusals and empty answers.
    pub(crate) fn into_text(self) -> Result<String> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(RagError::MalformedResponse("response has no choices".into()));
        };
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(RagError::GenerationRejected {
                provider: PROVIDER.into(),
                reason: "response withheld by content filter".into(),
            });
        }
        let message = choice.message.ok_or_else(|| {
            RagError::MalformedResponse("choice has no message".into())
        })?;
        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(RagError::GenerationRejected { provider: PROVIDER.into(), reason: refusal });
        }
        match message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(RagError::MalformedResponse("response contains no text".into())),
        }
    }
}

/// A [`GenerationClient`] calling `/chat/completions` with a single user message.
pub struct OpenAIChatClient {
    client: reqwest::Client,
    api_key: ApiKey,
    url: Url,
    model: String,
    timeout: Duration,
    temperature: Option<f32>,
}

impl OpenAIChatClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = http::base_url(config.base_url.as_deref().unwrap_or(OPENAI_API_BASE))?;
        let url = base
            .join("chat/completions")
            .map_err(|e| RagError::ConfigError(format!("invalid chat URL: {e}")))?;
        Ok(Self {
            client: http::client(config.timeout)?,
            api_key: config.api_key.clone(),
            url,
            model: config.model_id.clone(),
            timeout: config.timeout,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationClient for OpenAIChatClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(self.api_key.expose())
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

        let parsed: ChatResponse = serde_json::from_str(&payload).map_err(|e| {
            RagError::MalformedResponse(format!("failed to parse OpenAI response: {e}"))
        })?;
        let text = parsed.into_text()?;
        debug!(provider = PROVIDER, response_len = text.len(), "generation completed");
        Ok(text)
    }
}
