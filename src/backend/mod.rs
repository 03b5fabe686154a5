//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs. Built-in implementations: [`OllamaBackend`], `OpenAiBackend`
//! (feature `openai`), and [`MockBackend`] for tests.
//!
//! ```text
//! ExtractionClient ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                            │
//!                          ┌─────────────────┼─────────────────┐
//!                    OllamaBackend      OpenAiBackend      MockBackend
//!                   /api/generate    /v1/chat/completions   scripted
//!                   /api/chat
//! ```

pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use mock::{MockBackend, MockReply};
pub use ollama::OllamaBackend;
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use crate::client::LlmConfig;
use crate::error::Result;
use crate::tokens::TokenUsage;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// A normalized LLM request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"llama3.2:3b"`, `"gpt-4o-mini"`).
    pub model: String,

    /// If `Some`, this is a chat-style call with a system prompt.
    /// If `None`, this is a generate-style call (prompt only).
    pub system_prompt: Option<String>,

    /// The user prompt text.
    pub prompt: String,

    /// Sampling and output settings.
    pub config: LlmConfig,
}

/// A normalized LLM response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Token counts, when the provider reports them.
    pub usage: Option<TokenUsage>,
}

/// Abstraction over LLM providers.
///
/// This trait is object-safe and meant to be used as `Arc<dyn Backend>`.
/// Implementations perform exactly one provider call per invocation; the
/// pipeline decides whether to try again.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming LLM call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Parse a `Retry-After` header value given in whole seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Send a JSON request and decode a JSON response body.
///
/// Non-success statuses become [`PipelineError::HttpError`] carrying the
/// body text and any `Retry-After` hint.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<(Value, u16)> {
    let resp = request.send().await?;
    let status = resp.status().as_u16();

    if !resp.status().is_success() {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = resp.text().await.unwrap_or_default();
        return Err(PipelineError::HttpError {
            status,
            body,
            retry_after,
        });
    }

    let json_resp: Value = resp.json().await?;
    Ok((json_resp, status))
}

/// Read a non-negative integer field from a provider response body.
pub(crate) fn count_field(value: &Value, pointer: &str) -> Option<usize> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}
