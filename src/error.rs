use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::output_parser::ParseError;
use crate::schema::SchemaError;
use crate::validator::ValidationError;

/// Errors produced by the extraction pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, reset, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON handling failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 401, 429, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The provider did not answer within the configured timeout.
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    /// A schema file could not be read or deserialized.
    #[error("failed to load schema from {}: {}", .path.display(), .source)]
    RegistryLoad { path: PathBuf, source: SchemaError },

    /// Two schema sources declared the same identifier.
    #[error("duplicate schema id '{id}' declared by {first} and {second}")]
    DuplicateSchema {
        id: String,
        first: String,
        second: String,
    },

    /// A lookup asked for a schema the registry does not hold.
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// No schema matched the document text. Never retried.
    #[error("classification failed: {0}")]
    Classification(String),

    /// The LLM response was not parseable as JSON.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The parsed value did not conform to its schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A persistence or OCR collaborator failed.
    #[error("collaborator failed: {0}")]
    Collaborator(String),
}

impl PipelineError {
    /// Provider-supplied `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::HttpError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Collaborator errors keep their whole context chain.
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Collaborator(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_only_from_http_errors() {
        let rate_limited = PipelineError::HttpError {
            status: 429,
            body: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(PipelineError::Timeout(Duration::from_secs(1)).retry_after(), None);
    }

    #[test]
    fn test_anyhow_maps_to_collaborator() {
        let err: PipelineError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, PipelineError::Collaborator(ref m) if m == "disk full"));

        let err: PipelineError = anyhow::anyhow!("disk full").context("storing input failed").into();
        assert!(matches!(err, PipelineError::Collaborator(ref m) if m == "storing input failed: disk full"));
    }

    #[test]
    fn test_registry_load_display() {
        let err = PipelineError::RegistryLoad {
            path: PathBuf::from("schemas/w2.json"),
            source: SchemaError::MissingId,
        };
        assert_eq!(
            err.to_string(),
            "failed to load schema from schemas/w2.json: schema declares no `$id` and has no fallback identifier"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
