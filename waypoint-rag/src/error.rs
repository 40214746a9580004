//! Error types for the `waypoint-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur anywhere in the recommendation pipeline.
///
/// Every stage reports through this one type so the coordinator can surface
/// the first failing stage's cause unchanged.
#[derive(Debug, Error)]
pub enum RagError {
    /// The query was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,

    /// The document store could not be loaded or is inconsistent.
    #[error("index unavailable at {}: {message}", path.display())]
    IndexUnavailable {
        /// The index directory or file that failed.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The prompt template is missing a placeholder or section marker.
    #[error("template error: {0}")]
    TemplateError(String),

    /// The generation provider could not be reached or refused authentication.
    #[error("generation unavailable ({provider}): {message}")]
    GenerationUnavailable {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation provider did not answer within the configured bound.
    #[error("generation timed out ({provider}) after {}ms", timeout.as_millis())]
    GenerationTimeout {
        /// The generation provider that timed out.
        provider: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The generation provider declined the prompt (content policy, quota).
    #[error("generation rejected ({provider}): {reason}")]
    GenerationRejected {
        /// The generation provider that rejected the prompt.
        provider: String,
        /// The provider's stated reason.
        reason: String,
    },

    /// The model output could not be minimally parsed into displayable text.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// An error occurred during embedding generation.
    #[error("embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// A field-free discriminant of [`RagError`], handy for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyQuery,
    IndexUnavailable,
    TemplateError,
    GenerationUnavailable,
    GenerationTimeout,
    GenerationRejected,
    MalformedResponse,
    EmbeddingError,
    ConfigError,
}

impl RagError {
    /// Return the discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::EmptyQuery => ErrorKind::EmptyQuery,
            RagError::IndexUnavailable { .. } => ErrorKind::IndexUnavailable,
            RagError::TemplateError(_) => ErrorKind::TemplateError,
            RagError::GenerationUnavailable { .. } => ErrorKind::GenerationUnavailable,
            RagError::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            RagError::GenerationRejected { .. } => ErrorKind::GenerationRejected,
            RagError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            RagError::EmbeddingError { .. } => ErrorKind::EmbeddingError,
            RagError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    pub(crate) fn index(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RagError::IndexUnavailable { path: path.into(), message: message.into() }
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_bound() {
        let err = RagError::GenerationTimeout {
            provider: "Gemini".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "generation timed out (Gemini) after 250ms");
        assert_eq!(err.kind(), ErrorKind::GenerationTimeout);
    }

    #[test]
    fn index_message_includes_path() {
        let err = RagError::index("/tmp/missing", "directory does not exist");
        assert_eq!(err.to_string(), "index unavailable at /tmp/missing: directory does not exist");
    }
}
