//! Token counting for prompts and responses.
//!
//! Provider-reported usage is preferred when a backend returns it; these
//! counts are the fallback. The tiktoken encodings are OpenAI's, so for
//! other model families they are estimates.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

/// Which tokenizer to count with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    #[default]
    Cl100kBase,
    O200kBase,
    /// `ceil(bytes / 4)`, no tokenizer tables needed.
    Heuristic,
}

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

const HEURISTIC_BYTES_PER_TOKEN: usize = 4;

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn load(
    cell: &'static OnceLock<Option<CoreBPE>>,
    init: fn() -> anyhow::Result<CoreBPE>,
) -> Option<&'static CoreBPE> {
    cell.get_or_init(|| match init() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            tracing::warn!(error = %e, "tokenizer unavailable, using heuristic counts");
            None
        }
    })
    .as_ref()
}

/// Counts tokens with a fixed [`TokenEncoding`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter {
    encoding: TokenEncoding,
}

impl TokenCounter {
    pub fn new(encoding: TokenEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> TokenEncoding {
        self.encoding
    }

    pub fn count(&self, text: &str) -> usize {
        let bpe = match self.encoding {
            TokenEncoding::Cl100kBase => load(&CL100K, cl100k_base),
            TokenEncoding::O200kBase => load(&O200K, o200k_base),
            TokenEncoding::Heuristic => None,
        };
        match bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => heuristic(text),
        }
    }
}

fn heuristic(text: &str) -> usize {
    text.len().div_ceil(HEURISTIC_BYTES_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cl100k_counts() {
        let counter = TokenCounter::default();
        let text = "Employer: Acme Corp. Wages: 50000.";
        let tokens = counter.count(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_heuristic_counts() {
        let counter = TokenCounter::new(TokenEncoding::Heuristic);
        assert_eq!(counter.count("twelve chars"), 3);
        assert_eq!(counter.count("thirteen char"), 4);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(TokenCounter::default().count(""), 0);
        assert_eq!(TokenCounter::new(TokenEncoding::Heuristic).count(""), 0);
    }

    #[test]
    fn test_encoding_names_in_config() {
        let enc: TokenEncoding = serde_json::from_str("\"o200k_base\"").unwrap();
        assert_eq!(enc, TokenEncoding::O200kBase);
    }
}
