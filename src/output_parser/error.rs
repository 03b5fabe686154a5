//! Error types for the response parser.

/// Errors returned when an LLM response cannot be turned into JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The response was empty, whitespace-only, or only a `<think>` block.
    #[error("empty LLM response")]
    EmptyResponse,

    /// No strategy produced syntactically valid JSON.
    #[error("response is not valid JSON ({reason}): {excerpt}")]
    Unparseable {
        /// The serde error from the best candidate.
        reason: String,
        /// A truncated copy of the candidate text.
        excerpt: String,
    },

    /// The response named none of the expected options.
    #[error("no valid choice found in response (valid: {valid:?})")]
    NoMatchingChoice { valid: Vec<String> },
}

/// Truncate to at most `max_chars` characters, appending "..." if cut.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
