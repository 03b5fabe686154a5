//! Provider-agnostic extraction client.
//!
//! [`ExtractionClient`] sends one prompt to one backend and returns the raw
//! text. It bounds the call with a timeout but never retries; that decision
//! belongs to the orchestrator.

use crate::backend::{Backend, LlmRequest, OllamaBackend};
#[cfg(feature = "openai")]
use crate::backend::OpenAiBackend;
use crate::error::Result;
use crate::tokens::TokenUsage;
use crate::PipelineError;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sampling and output settings for a provider call.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Ask the provider to constrain output to JSON.
    pub json_mode: bool,

    /// Fixed sampling seed, where the provider supports one.
    pub seed: Option<u64>,

    /// Custom options merged into the Ollama options object.
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
            json_mode: false,
            seed: None,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Text returned by the provider for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub text: String,
    /// Provider-reported token counts, if any.
    pub usage: Option<TokenUsage>,
}

/// Sends prompts to a configured backend.
///
/// Cheap to share: the HTTP client and backend are reference counted.
///
/// ```
/// use schema_extract::client::ExtractionClient;
/// use std::time::Duration;
///
/// let client = ExtractionClient::builder("http://localhost:11434/api")
///     .model("llama3.2:3b")
///     .timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(client.base_url(), "http://localhost:11434");
/// ```
pub struct ExtractionClient {
    http: Client,
    base_url: String,
    backend: Arc<dyn Backend>,
    model: String,
    system_prompt: Option<String>,
    config: LlmConfig,
    timeout: Duration,
}

impl ExtractionClient {
    pub fn builder(base_url: impl Into<String>) -> ExtractionClientBuilder {
        ExtractionClientBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            config: LlmConfig::default(),
            timeout: None,
        }
    }

    /// Send `prompt` and wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Timeout`] if the provider does not answer in time.
    /// - Whatever the backend returns for transport or HTTP failures.
    pub async fn send(&self, prompt: &str) -> Result<RawResponse> {
        let request = LlmRequest {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            prompt: prompt.to_string(),
            config: self.config.clone(),
        };

        let started = Instant::now();
        let call = self.backend.complete(&self.http, &self.base_url, &request);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(backend = self.backend.name(), timeout = ?self.timeout, "provider call timed out");
                return Err(PipelineError::Timeout(self.timeout));
            }
        };

        tracing::debug!(
            backend = self.backend.name(),
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = response.text.len(),
            "provider call finished"
        );

        Ok(RawResponse {
            text: response.text,
            usage: response.usage,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

/// Default provider timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for [`ExtractionClient`].
pub struct ExtractionClientBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    model: String,
    system_prompt: Option<String>,
    config: LlmConfig,
    timeout: Option<Duration>,
}

impl ExtractionClientBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the LLM backend. Default: [`OllamaBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use the OpenAI-compatible backend, optionally with an API key.
    #[cfg(feature = "openai")]
    pub fn openai(mut self, api_key: Option<String>) -> Self {
        let backend = match api_key {
            Some(key) => OpenAiBackend::new().with_api_key(key),
            None => OpenAiBackend::new(),
        };
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound each provider call. Default: 60 seconds.
    ///
    /// Enforced with `tokio::time::timeout` around the backend call, and
    /// also applied to the HTTP client when no custom client is given.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// # Errors
    ///
    /// [`PipelineError::Request`] if the HTTP client cannot be built.
    pub fn build(self) -> Result<ExtractionClient> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let http = match self.client {
            Some(client) => client,
            None => Client::builder().timeout(timeout).build()?,
        };
        Ok(ExtractionClient {
            http,
            base_url: normalize_base_url(&self.base_url),
            backend: self.backend.unwrap_or_else(|| Arc::new(OllamaBackend)),
            model: self.model,
            system_prompt: self.system_prompt,
            config: self.config,
            timeout,
        })
    }
}

/// Strip known provider path suffixes from a base URL so backends can
/// append their own paths.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // longest first
    for suffix in [
        "/v1/chat/completions",
        "/v1/chat",
        "/v1",
        "/api/generate",
        "/api/chat",
        "/api",
    ] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
