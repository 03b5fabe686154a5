//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] plays back scripted replies in order, cycling when the
//! script runs out, and records every prompt it receives.
//!
//! ```
//! use schema_extract::backend::{MockBackend, MockReply};
//!
//! let mock = MockBackend::scripted(vec![
//!     MockReply::http(503, "overloaded"),
//!     MockReply::text(r#"{"wages": 50000}"#),
//! ]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::tokens::TokenUsage;
use crate::PipelineError;

/// One scripted backend behaviour.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text with status 200.
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    /// Fail as the provider would on a non-success status.
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// Wait before returning the text (for timeout tests).
    Delayed { delay: Duration, text: String },
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text {
            text: text.into(),
            usage: None,
        }
    }

    pub fn with_usage(
        text: impl Into<String>,
        prompt_tokens: usize,
        completion_tokens: usize,
    ) -> Self {
        MockReply::Text {
            text: text.into(),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
            }),
        }
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        MockReply::Http {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        MockReply::Http {
            status: 429,
            body: "rate limited".into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn delayed(delay: Duration, text: impl Into<String>) -> Self {
        MockReply::Delayed {
            delay,
            text: text.into(),
        }
    }
}

/// A test backend that plays back scripted replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a mock that returns the given texts in order.
    ///
    /// # Panics
    ///
    /// If `responses` is empty.
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::text).collect())
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::scripted(vec![MockReply::text(response)])
    }

    /// Create a mock from arbitrary scripted behaviours.
    ///
    /// # Panics
    ///
    /// If `replies` is empty.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockBackend requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::SeqCst) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        let ok = |text: String, usage: Option<TokenUsage>| LlmResponse {
            text,
            status: 200,
            usage,
        };

        match self.next_reply() {
            MockReply::Text { text, usage } => Ok(ok(text, usage)),
            MockReply::Http {
                status,
                body,
                retry_after,
            } => Err(PipelineError::HttpError {
                status,
                body,
                retry_after,
            }),
            MockReply::Delayed { delay, text } => {
                tokio::time::sleep(delay).await;
                Ok(ok(text, None))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
