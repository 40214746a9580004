//! Configuration for retrieval and generation.
//!
//! Everything here is supplied from outside (flags, environment, `.env`);
//! nothing in the crate carries a default credential.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::Strategy;
use crate::error::{RagError, Result};
use crate::hybrid::FusionPolicy;

/// Default number of candidates handed to the prompt.
pub const DEFAULT_TOP_K: usize = 10;

/// Default bound on a single generation request.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

impl FromStr for Strategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "vector" => Ok(Strategy::Dense),
            "lexical" | "bm25" => Ok(Strategy::Lexical),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(RagError::ConfigError(format!(
                "unknown retrieval strategy '{other}' (expected dense, lexical or hybrid)"
            ))),
        }
    }
}

/// Retrieval parameters for one pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Which retrieval strategy to run.
    pub strategy: Strategy,
    /// Maximum number of candidates returned by retrieval.
    pub top_k: usize,
    /// Minimum base-strategy score; candidates below it are dropped.
    pub min_score: Option<f32>,
    /// How dense and lexical rankings are merged in hybrid mode.
    pub fusion: FusionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Dense,
            top_k: DEFAULT_TOP_K,
            min_score: None,
            fusion: FusionPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for constructing a [`PipelineConfig`].
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the retrieval strategy.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Set the number of candidates to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum relevance threshold.
    pub fn min_score(mut self, threshold: Option<f32>) -> Self {
        self.config.min_score = threshold;
        self
    }

    /// Set the hybrid fusion policy.
    pub fn fusion(mut self, fusion: FusionPolicy) -> Self {
        self.config.fusion = fusion;
        self
    }

    /// Build the [`PipelineConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `top_k == 0`
    /// - `min_score` is not finite
    /// - the fusion policy parameters are out of range
    pub fn build(self) -> Result<PipelineConfig> {
        if self.config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if let Some(threshold) = self.config.min_score {
            if !threshold.is_finite() {
                return Err(RagError::ConfigError(format!(
                    "min_score must be a finite number, got {threshold}"
                )));
            }
        }
        self.config.fusion.validate()?;
        Ok(self.config)
    }
}

/// A provider credential. Its `Debug` and `Display` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a credential, rejecting blank values.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RagError::ConfigError("API key must not be empty".to_string()));
        }
        Ok(Self(key))
    }

    /// Read a credential from an environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let key = std::env::var(var).map_err(|_| {
            RagError::ConfigError(format!("{var} environment variable not set"))
        })?;
        Self::new(key)
    }

    /// Expose the raw credential for request signing.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Which remote text-generation API to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    Gemini,
    OpenAI,
}

impl GenerationProvider {
    /// The model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            GenerationProvider::Gemini => "gemini-2.0-flash",
            GenerationProvider::OpenAI => "gpt-4o-mini",
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(GenerationProvider::Gemini),
            "openai" => Ok(GenerationProvider::OpenAI),
            other => Err(RagError::ConfigError(format!(
                "unknown generation provider '{other}' (expected gemini or openai)"
            ))),
        }
    }
}

/// Connection parameters for a generation client.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    pub model_id: String,
    pub api_key: ApiKey,
    /// Override of the provider's API base URL (proxies, tests).
    pub base_url: Option<String>,
    /// Bound on a single request, connect through last body byte.
    pub timeout: Duration,
    pub temperature: Option<f32>,
}

impl GenerationConfig {
    /// Create a configuration with the provider's default model and timeout.
    pub fn new(provider: GenerationProvider, api_key: ApiKey) -> Self {
        Self {
            provider,
            model_id: provider.default_model().to_string(),
            api_key,
            base_url: None,
            timeout: DEFAULT_GENERATION_TIMEOUT,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Check that the configuration can produce a working client.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(RagError::ConfigError("model id must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(RagError::ConfigError("generation timeout must be positive".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RagError::ConfigError(format!(
                    "temperature must be within 0.0..=2.0, got {t}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_top_k() {
        let err = PipelineConfig::builder().top_k(0).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn rejects_nan_threshold() {
        let err = PipelineConfig::builder().min_score(Some(f32::NAN)).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn parses_strategies() {
        assert_eq!("Dense".parse::<Strategy>().unwrap(), Strategy::Dense);
        assert_eq!("bm25".parse::<Strategy>().unwrap(), Strategy::Lexical);
        assert_eq!(" hybrid ".parse::<Strategy>().unwrap(), Strategy::Hybrid);
        assert!("fuzzy".parse::<Strategy>().is_err());
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("secret-value").unwrap();
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.to_string(), "***");
        assert_eq!(key.expose(), "secret-value");
        assert!(ApiKey::new("   ").is_err());
    }

    #[test]
    fn generation_config_defaults_to_provider_model() {
        let key = ApiKey::new("k").unwrap();
        let config = GenerationConfig::new(GenerationProvider::Gemini, key);
        assert_eq!(config.model_id, "gemini-2.0-flash");
        assert_eq!(config.timeout, DEFAULT_GENERATION_TIMEOUT);
        assert!(config.validate().is_ok());
        assert!(config.with_timeout(Duration::ZERO).validate().is_err());
    }
}
