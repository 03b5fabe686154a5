//! Choosing a schema for a document.
//!
//! [`LlmClassifier`] asks the model; [`KeywordClassifier`] scores keyword
//! hits locally. Every failure surfaces as
//! [`PipelineError::Classification`], and the orchestrator never retries it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::ExtractionClient;
use crate::error::{PipelineError, Result};
use crate::output_parser::parse_choice;
use crate::prompt::classification_prompt;
use crate::registry::SchemaRegistry;
use crate::tokens::{TokenCounter, TokenUsage};

/// A classifier's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub schema_id: String,
    /// Tokens spent deciding, if a model was involved.
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Pick the registered schema that best matches `text`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Classification`] if no schema can be chosen.
    async fn classify(&self, text: &str, registry: &SchemaRegistry) -> Result<Classification>;

    fn name(&self) -> &'static str;
}

/// Default number of characters taken from each end of the document.
pub const DEFAULT_SNIPPET_CHARS: usize = 200;

/// Asks the model which schema id fits, from a head and tail snippet.
#[derive(Debug)]
pub struct LlmClassifier {
    client: Arc<ExtractionClient>,
    snippet_chars: usize,
    counter: TokenCounter,
}

impl LlmClassifier {
    pub fn new(client: Arc<ExtractionClient>) -> Self {
        Self {
            client,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            counter: TokenCounter::default(),
        }
    }

    pub fn with_snippet_chars(mut self, chars: usize) -> Self {
        self.snippet_chars = chars;
        self
    }

    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, text: &str, registry: &SchemaRegistry) -> Result<Classification> {
        let ids: Vec<&str> = registry.ids().collect();
        let prompt = classification_prompt(&ids, text, self.snippet_chars);

        let raw = self
            .client
            .send(&prompt)
            .await
            .map_err(|e| PipelineError::Classification(format!("classifier call failed: {}", e)))?;

        let usage = raw.usage.unwrap_or_else(|| TokenUsage {
            prompt_tokens: self.counter.count(&prompt),
            completion_tokens: self.counter.count(&raw.text),
        });

        let schema_id = parse_choice(&raw.text, &ids).map_err(|_| {
            PipelineError::Classification(format!(
                "unknown schema_id: {}",
                raw.text.trim()
            ))
        })?;

        Ok(Classification {
            schema_id: schema_id.to_string(),
            usage: Some(usage),
        })
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Scores schemas by case-insensitive keyword occurrences.
///
/// Keywords come from each schema's `x-keywords` unless overridden. The
/// highest score wins; ties at the top, or fewer than `min_hits`, fail.
///
/// ```
/// # tokio_test::block_on(async {
/// use schema_extract::classifier::{Classifier, KeywordClassifier};
/// use schema_extract::registry::SchemaRegistry;
/// use schema_extract::schema::SchemaDefinition;
///
/// let registry = SchemaRegistry::from_definitions(vec![
///     SchemaDefinition::new("w2", "1.0").with_keywords(&["wage and tax statement"]),
///     SchemaDefinition::new("1040", "1.0").with_keywords(&["individual income tax return"]),
/// ]).unwrap();
///
/// let found = KeywordClassifier::new()
///     .classify("Form W-2 Wage and Tax Statement 2023", &registry)
///     .await
///     .unwrap();
/// assert_eq!(found.schema_id, "w2");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    overrides: BTreeMap<String, Vec<String>>,
    min_hits: usize,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            min_hits: 1,
        }
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `keywords` for `schema_id` instead of the schema's own list.
    pub fn with_keywords(mut self, schema_id: impl Into<String>, keywords: &[&str]) -> Self {
        self.overrides.insert(
            schema_id.into(),
            keywords.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    pub fn with_min_hits(mut self, min_hits: usize) -> Self {
        self.min_hits = min_hits.max(1);
        self
    }

    fn score(haystack: &str, keywords: &[String]) -> usize {
        keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| haystack.matches(k.as_str()).count())
            .sum()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str, registry: &SchemaRegistry) -> Result<Classification> {
        let haystack = text.to_lowercase();

        let mut scores: Vec<(usize, &str)> = registry
            .iter()
            .map(|schema| {
                let keywords = self.overrides.get(&schema.id).unwrap_or(&schema.keywords);
                (Self::score(&haystack, keywords), schema.id.as_str())
            })
            .collect();
        scores.sort_by(|a, b| b.0.cmp(&a.0));

        match scores.as_slice() {
            [(best, id), rest @ ..] if *best >= self.min_hits => {
                if let Some((_, other)) = rest.iter().find(|(s, _)| s == best) {
                    return Err(PipelineError::Classification(format!(
                        "ambiguous keywords: '{}' and '{}' both scored {}",
                        id, other, best
                    )));
                }
                tracing::debug!(schema_id = %id, hits = best, "keyword classification");
                Ok(Classification {
                    schema_id: id.to_string(),
                    usage: None,
                })
            }
            _ => Err(PipelineError::Classification(
                "no schema keywords found in document".into(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}
