//! Backend for Ollama's native API.
//!
//! [`OllamaBackend`] translates normalized [`LlmRequest`]s into Ollama's
//! `/api/generate` and `/api/chat` endpoints. This is the default backend.

use super::{count_field, send_json, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::tokens::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for Ollama's native API.
///
/// Uses `/api/chat` when a non-empty system prompt is set, otherwise
/// `/api/generate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaBackend;

impl OllamaBackend {
    fn build_options(request: &LlmRequest) -> Value {
        let mut opts = json!({
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        });
        if let Some(seed) = request.config.seed {
            opts["seed"] = json!(seed);
        }
        if let Some(ref custom) = request.config.options {
            if let (Some(base), Some(extra)) = (opts.as_object_mut(), custom.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
        opts
    }

    fn use_chat(request: &LlmRequest) -> bool {
        request
            .system_prompt
            .as_ref()
            .is_some_and(|s| !s.is_empty())
    }

    fn build_generate_body(request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": Self::build_options(request),
        });
        if request.config.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn build_chat_body(request: &LlmRequest) -> Value {
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
            "stream": false,
            "options": Self::build_options(request),
        });
        if request.config.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn extract_usage(json_resp: &Value) -> Option<TokenUsage> {
        let prompt = count_field(json_resp, "/prompt_eval_count");
        let completion = count_field(json_resp, "/eval_count");
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        Some(TokenUsage {
            prompt_tokens: prompt.unwrap_or(0),
            completion_tokens: completion.unwrap_or(0),
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let base = base_url.trim_end_matches('/');

        let (url, body, text_pointer) = if Self::use_chat(request) {
            (
                format!("{}/api/chat", base),
                Self::build_chat_body(request),
                "/message/content",
            )
        } else {
            (
                format!("{}/api/generate", base),
                Self::build_generate_body(request),
                "/response",
            )
        };

        tracing::debug!(url = %url, model = %request.model, "ollama request");
        let (json_resp, status) = send_json(client.post(&url).json(&body)).await?;

        let text = json_resp
            .pointer(text_pointer)
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
        "ollama"
    }
}
