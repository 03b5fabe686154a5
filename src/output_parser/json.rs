//! Syntactic JSON extraction from a raw model response.
//!
//! [`ResponseParser`] only answers "is there JSON in here, and what is it".
//! Whether the JSON fits a schema is the validator's business.

use serde_json::Value;

use crate::output_parser::error::{truncate, ParseError};
use crate::output_parser::extract::{
    fenced_block, find_bracketed, preprocess, strip_outer_fence, unclosed_tail,
};
use crate::output_parser::repair::try_repair_json;

/// JSON recovered from a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    /// Whether [`try_repair_json`] had to fix the text first.
    pub repaired: bool,
}

/// Turns raw model text into a JSON value.
///
/// Candidates are tried in order: the cleaned reply as a whole, the reply
/// without an outer fence, the first fenced block, the last balanced
/// `{...}`, then the last balanced `[...]`. Repair is off by default; when
/// enabled with [`ResponseParser::with_repair`], each
/// candidate (plus any unclosed `{...` tail) is then run through
/// [`try_repair_json`].
///
/// ```
/// use schema_extract::output_parser::ResponseParser;
///
/// let parser = ResponseParser::new();
/// let parsed = parser.parse("```json\n{\"wages\": 50000}\n```").unwrap();
/// assert_eq!(parsed.value["wages"], 50000);
/// assert!(!parsed.repaired);
///
/// assert!(parser.parse("{'wages': 50000}").is_err());
///
/// let lenient = ResponseParser::new().with_repair(true);
/// assert!(lenient.parse("{'wages': 50000}").unwrap().repaired);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseParser {
    repair: bool,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self { repair: false }
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repair(mut self, enabled: bool) -> Self {
        self.repair = enabled;
        self
    }

    pub fn repair_enabled(&self) -> bool {
        self.repair
    }

    /// Extract a JSON value from `raw`.
    ///
    /// # Errors
    ///
    /// - [`ParseError::EmptyResponse`] if nothing is left after stripping
    ///   whitespace and reasoning blocks.
    /// - [`ParseError::Unparseable`] if no candidate is valid JSON.
    pub fn parse(&self, raw: &str) -> Result<ParsedResponse, ParseError> {
        let cleaned = preprocess(raw);
        if cleaned.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let candidates = candidates(&cleaned);

        for candidate in &candidates {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Ok(ParsedResponse {
                    value,
                    repaired: false,
                });
            }
        }

        if self.repair {
            let tail = unclosed_tail(&cleaned, '{');
            for candidate in candidates.iter().copied().chain(tail) {
                if let Some(fixed) = try_repair_json(candidate) {
                    if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
                        tracing::debug!(original_len = candidate.len(), "repaired model JSON");
                        return Ok(ParsedResponse {
                            value,
                            repaired: true,
                        });
                    }
                }
            }
        }

        let best = candidates
            .iter()
            .rev()
            .find(|c| c.starts_with('{') || c.starts_with('['))
            .copied()
            .unwrap_or(cleaned.as_str());
        let reason = match serde_json::from_str::<Value>(best) {
            Err(e) => e.to_string(),
            Ok(_) => "no JSON payload found".to_string(),
        };
        Err(ParseError::Unparseable {
            reason,
            excerpt: truncate(best, 200),
        })
    }
}

/// Parse with the default (strict) parser and return only the value.
pub fn parse_json_value(response: &str) -> Result<Value, ParseError> {
    ResponseParser::new().parse(response).map(|p| p.value)
}

fn candidates(cleaned: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(5);
    let found = [
        Some(cleaned),
        Some(strip_outer_fence(cleaned)),
        fenced_block(cleaned),
        find_bracketed(cleaned, '{', '}'),
        find_bracketed(cleaned, '[', ']'),
    ];
    for candidate in found.into_iter().flatten() {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
