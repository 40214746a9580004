//! Generation client trait and provider selection.
//!
//! A generation client makes one blocking request per prompt and returns the
//! model's raw text untouched. Failures are classified into
//! [`GenerationUnavailable`](RagError::GenerationUnavailable),
//! [`GenerationTimeout`](RagError::GenerationTimeout),
//! [`GenerationRejected`](RagError::GenerationRejected) and
//! [`MalformedResponse`](RagError::MalformedResponse). Nothing here retries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{GenerationConfig, GenerationProvider};
use crate::error::{RagError, Result};

/// A remote text-generation model.
///
/// # Example
///
/// ```rust,ignore
/// use waypoint_rag::{GenerationClient, GeminiClient, GenerationConfig};
///
/// let client = GeminiClient::new(&config)?;
/// let raw = client.generate("Recommend three beaches in Egypt").await?;
/// ```
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Send `prompt` and return the model's raw text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build the client selected by `config.provider`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if the configuration is invalid or the
/// provider was compiled out.
pub fn build_generation_client(config: &GenerationConfig) -> Result<Arc<dyn GenerationClient>> {
    config.validate()?;
    match config.provider {
        #[cfg(feature = "gemini")]
        GenerationProvider::Gemini => Ok(Arc::new(crate::gemini::GeminiClient::new(config)?)),
        #[cfg(feature = "openai")]
        GenerationProvider::OpenAI => Ok(Arc::new(crate::openai::OpenAIChatClient::new(config)?)),
        #[allow(unreachable_patterns)]
        other => Err(RagError::ConfigError(format!(
            "generation provider {other:?} is not enabled in this build"
        ))),
    }
}

#[cfg(any(feature = "gemini", feature = "openai"))]
pub(crate) mod http {
    //! Shared request plumbing for the HTTP providers.

    use std::time::Duration;

    use reqwest::StatusCode;
    use url::Url;

    use crate::error::RagError;

    /// Parse a base URL, making sure relative joins append to its path.
    pub fn base_url(raw: &str) -> Result<Url, RagError> {
        let with_slash = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
        Url::parse(&with_slash)
            .map_err(|e| RagError::ConfigError(format!("invalid base URL '{raw}': {e}")))
    }

    pub fn client(timeout: Duration) -> Result<reqwest::Client, RagError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))
    }

    /// Classify a transport-level failure.
    pub fn transport_error(provider: &str, timeout: Duration, err: &reqwest::Error) -> RagError {
        if err.is_timeout() {
            RagError::GenerationTimeout { provider: provider.to_string(), timeout }
        } else {
            RagError::GenerationUnavailable {
                provider: provider.to_string(),
                message: format!("request failed: {err}"),
            }
        }
    }

    /// Provider error codes and messages that mean the credential was refused.
    const CREDENTIAL_MARKERS: &[&str] = &[
        "api_key_invalid",
        "api key not valid",
        "api key expired",
        "invalid_api_key",
        "invalid api key",
        "unauthenticated",
        "permission_denied",
    ];

    fn is_credential_failure(detail: &str) -> bool {
        let detail = detail.to_lowercase();
        CREDENTIAL_MARKERS.iter().any(|marker| detail.contains(marker))
    }

    /// Classify a non-success HTTP status.
    ///
    /// Some providers answer a bad key with 400 rather than 401, so a 400 is
    /// only a rejection when its detail does not name a credential failure.
    pub fn status_error(provider: &str, status: StatusCode, detail: String) -> RagError {
        let provider = provider.to_string();
        match status.as_u16() {
            400 if is_credential_failure(&detail) => RagError::GenerationUnavailable {
                provider,
                message: format!("{status}: {detail}"),
            },
            400 | 429 | 451 => {
                RagError::GenerationRejected { provider, reason: format!("{status}: {detail}") }
            }
            _ => RagError::GenerationUnavailable {
                provider,
                message: format!("{status}: {detail}"),
            },
        }
    }
}
