//! File and environment configuration.
//!
//! ```toml
//! backend = "ollama"
//! base_url = "http://localhost:11434"
//! model = "llama3.2:3b"
//! classifier = "keyword"
//! schema_dir = "schemas"
//! ```
//!
//! Every key is optional. After the file is read, `SCHEMA_EXTRACT_API_KEY`,
//! `SCHEMA_EXTRACT_BASE_URL` and `SCHEMA_EXTRACT_MODEL` override their keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::classifier::{Classifier, KeywordClassifier, LlmClassifier, DEFAULT_SNIPPET_CHARS};
use crate::client::{ExtractionClient, LlmConfig, DEFAULT_MODEL};
use crate::error::{PipelineError, Result};
use crate::orchestrator::Extractor;
use crate::output_parser::ResponseParser;
use crate::registry::SchemaRegistry;
use crate::retry::RetryPolicy;
use crate::tokens::{TokenCounter, TokenEncoding};

pub const ENV_API_KEY: &str = "SCHEMA_EXTRACT_API_KEY";
pub const ENV_BASE_URL: &str = "SCHEMA_EXTRACT_BASE_URL";
pub const ENV_MODEL: &str = "SCHEMA_EXTRACT_MODEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Ollama,
    /// Needs the `openai` feature.
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Llm,
    Keyword,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub backend: BackendKind,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub json_mode: bool,
    pub request_timeout_secs: u64,
    pub client_retry_delay_ms: u64,
    pub respect_retry_after: bool,
    pub max_retry_after_secs: u64,
    pub classifier: ClassifierKind,
    /// Characters taken from each end of the document for LLM classification.
    pub snippet_chars: usize,
    pub json_repair: bool,
    pub token_encoding: TokenEncoding,
    pub schema_dir: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let llm = LlmConfig::default();
        Self {
            backend: BackendKind::default(),
            base_url: "http://localhost:11434".to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            json_mode: llm.json_mode,
            request_timeout_secs: 60,
            client_retry_delay_ms: retry.client_retry_delay.as_millis() as u64,
            respect_retry_after: retry.respect_retry_after,
            max_retry_after_secs: retry.max_retry_after.as_secs(),
            classifier: ClassifierKind::default(),
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            json_repair: false,
            token_encoding: TokenEncoding::default(),
            schema_dir: PathBuf::from("schemas"),
        }
    }
}

impl std::fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("classifier", &self.classifier)
            .field("schema_dir", &self.schema_dir)
            .finish_non_exhaustive()
    }
}

impl ExtractorConfig {
    /// Parse TOML without touching the environment.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidConfig`] on malformed TOML or bad values.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(src).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists (defaults otherwise), then apply
    /// environment overrides and validate.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
            })?;
            toml::from_str(&content).map_err(|e| {
                PipelineError::InvalidConfig(format!("{}: {}", path.display(), e))
            })?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override keys from an environment lookup. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(model) = get(ENV_MODEL) {
            self.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.base_url.trim().is_empty() {
            errors.push("base_url must not be empty");
        }
        if self.model.trim().is_empty() {
            errors.push("model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push("temperature must be between 0.0 and 2.0");
        }
        if self.max_tokens == 0 {
            errors.push("max_tokens must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be greater than 0");
        }
        if self.snippet_chars == 0 {
            errors.push("snippet_chars must be greater than 0");
        }
        if self.schema_dir.as_os_str().is_empty() {
            errors.push("schema_dir must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(errors.join("; ")))
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig::default()
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_json_mode(self.json_mode)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_client_retry_delay(Duration::from_millis(self.client_retry_delay_ms))
            .with_respect_retry_after(self.respect_retry_after)
            .with_max_retry_after(Duration::from_secs(self.max_retry_after_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the provider client this config describes.
    pub fn build_client(&self) -> Result<ExtractionClient> {
        let builder = ExtractionClient::builder(&self.base_url)
            .model(&self.model)
            .config(self.llm_config())
            .timeout(self.request_timeout());

        let builder = match self.backend {
            BackendKind::Ollama => builder,
            #[cfg(feature = "openai")]
            BackendKind::OpenAi => builder.openai(self.api_key.clone()),
            #[cfg(not(feature = "openai"))]
            BackendKind::OpenAi => {
                return Err(PipelineError::InvalidConfig(
                    "backend \"openai\" requires the `openai` feature".into(),
                ))
            }
        };
        builder.build()
    }
}

impl Extractor {
    /// Load schemas from `config.schema_dir` and wire every component.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        config.validate()?;
        let registry = SchemaRegistry::load(&config.schema_dir)?;
        Self::from_config_with_registry(config, Arc::new(registry))
    }

    /// Like [`from_config`](Self::from_config) with an already-built registry.
    pub fn from_config_with_registry(
        config: &ExtractorConfig,
        registry: Arc<SchemaRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(config.build_client()?);
        let counter = TokenCounter::new(config.token_encoding);

        let classifier: Arc<dyn Classifier> = match config.classifier {
            ClassifierKind::Llm => Arc::new(
                LlmClassifier::new(client.clone())
                    .with_snippet_chars(config.snippet_chars)
                    .with_token_counter(counter),
            ),
            ClassifierKind::Keyword => Arc::new(KeywordClassifier::new()),
        };

        tracing::info!(
            backend = client.backend_name(),
            model = client.model(),
            classifier = classifier.name(),
            schemas = registry.len(),
            "extractor configured"
        );

        Extractor::builder(registry, client)
            .classifier(classifier)
            .parser(ResponseParser::new().with_repair(config.json_repair))
            .retry_policy(config.retry_policy())
            .token_counter(counter)
            .build()
    }
}
