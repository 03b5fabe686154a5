//! Backend for OpenAI-compatible chat completion APIs.
//!
//! Works with OpenAI, vLLM, llama.cpp server, LM Studio, Groq, Together,
//! and Ollama's `/v1/` endpoint. Always uses `/v1/chat/completions`.

use super::{count_field, send_json, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::tokens::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API.
///
/// ```
/// use schema_extract::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    /// Sent as `Authorization: Bearer {key}` when set.
    pub(crate) api_key: Option<String>,
    /// Sent as `OpenAI-Organization` when set.
    pub(crate) organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.api_key.as_ref().map(|k| match k.char_indices().nth(6) {
            Some((idx, _)) => format!("{}***", &k[..idx]),
            None => "***".to_string(),
        });
        f.debug_struct("OpenAiBackend")
            .field("api_key", &redacted)
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_body(request: &LlmRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                messages.push(json!({"role": "system", "content": sys}));
            }
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": false,
        });
        if let Some(seed) = request.config.seed {
            body["seed"] = json!(seed);
        }
        if request.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        // Ollama-specific `options` are not forwarded.
        body
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }
        req
    }

    fn extract_usage(json_resp: &Value) -> Option<TokenUsage> {
        Some(TokenUsage {
            prompt_tokens: count_field(json_resp, "/usage/prompt_tokens")?,
            completion_tokens: count_field(json_resp, "/usage/completion_tokens").unwrap_or(0),
        })
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(request);

        tracing::debug!(url = %url, model = %request.model, "openai request");
        let (json_resp, status) = send_json(self.build_http_request(client, &url, &body)).await?;

        let text = json_resp
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(LlmResponse {
            text,
            status,
            usage: Self::extract_usage(&json_resp),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LlmConfig;

    fn test_request() -> LlmRequest {
        LlmRequest {
            model: "gpt-4o-mini".into(),
            system_prompt: None,
            prompt: "Extract the 1040 fields.".into(),
            config: LlmConfig::default(),
        }
    }

    #[test]
    fn test_chat_payload() {
        let mut request = test_request();
        request.system_prompt = Some("You are an information extraction engine.".into());

        let body = OpenAiBackend::build_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 2048);

        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "Extract the 1040 fields.");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_json_mode() {
        let mut request = test_request();
        request.config.json_mode = true;
        let body = OpenAiBackend::build_body(&request);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_custom_options_not_forwarded() {
        let mut request = test_request();
        request.config.options = Some(json!({"top_p": 0.9}));
        let body = OpenAiBackend::build_body(&request);
        assert!(body.get("options").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn test_auth_headers() {
        let backend = OpenAiBackend::new()
            .with_api_key("sk-test123")
            .with_organization("org-abc");
        let req = backend
            .build_http_request(&Client::new(), "https://api.openai.com/v1/chat/completions", &json!({}))
            .build()
            .expect("build request");

        assert_eq!(req.headers().get("Authorization").unwrap(), "Bearer sk-test123");
        assert_eq!(req.headers().get("OpenAI-Organization").unwrap(), "org-abc");
    }

    #[test]
    fn test_usage_extraction() {
        let resp = json!({
            "choices": [{"message": {"content": "{}"}}],
            "usage": {"prompt_tokens": 210, "completion_tokens": 42, "total_tokens": 252}
        });
        assert_eq!(
            OpenAiBackend::extract_usage(&resp),
            Some(TokenUsage {
                prompt_tokens: 210,
                completion_tokens: 42
            })
        );
        assert_eq!(OpenAiBackend::extract_usage(&json!({"choices": []})), None);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = OpenAiBackend::new().with_api_key("sk-1234567890abcdef");
        let debug_output = format!("{:?}", backend);
        assert!(!debug_output.contains("1234567890abcdef"));
        assert!(debug_output.contains("sk-123***"));
        assert!(format!("{:?}", OpenAiBackend::new()).contains("None"));
    }
}
