//! Prompt construction for classification and extraction.
//!
//! Everything here is pure: the same inputs always produce the same prompt.
//! A retry prompt always begins with the complete baseline prompt and adds
//! a correction section after it.

use crate::schema::{FieldSpec, SchemaDefinition};
use crate::validator::{ValidationError, ValidationRule};

/// What went wrong on the first attempt, used to tailor the retry prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryContext {
    /// The reply was not parseable JSON.
    Parse { detail: String },
    /// The reply parsed but broke a schema rule.
    Validation { violation: ValidationError },
    /// The provider call itself failed; the model never answered.
    Client { cause: String },
}

/// Which attempt a prompt is for.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Initial,
    Retry(RetryContext),
}

const DEFAULT_INSTRUCTION: &str = "You are an information extraction engine.";

/// Builds extraction prompts from a schema and document text.
///
/// ```
/// use schema_extract::prompt::{Attempt, PromptBuilder, RetryContext};
/// use schema_extract::schema::{FieldSpec, FieldType, SchemaDefinition};
///
/// let schema = SchemaDefinition::new("w2", "1.0")
///     .with_field(FieldSpec::required("wages", FieldType::Number));
/// let builder = PromptBuilder::new();
///
/// let first = builder.build("Wages: 50000", &schema, &Attempt::Initial);
/// let retry = builder.build(
///     "Wages: 50000",
///     &schema,
///     &Attempt::Retry(RetryContext::Parse { detail: "expected value".into() }),
/// );
/// assert!(first.contains("1. wages (number, required)"));
/// assert!(retry.starts_with(&first));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    instruction: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the opening role sentence.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn build(&self, text: &str, schema: &SchemaDefinition, attempt: &Attempt) -> String {
        let baseline = self.baseline(text, schema);
        match attempt {
            Attempt::Initial => baseline,
            Attempt::Retry(ctx) => {
                format!("{}\n\n{}", baseline, section("Correction", &correction(ctx)))
            }
        }
    }

    fn baseline(&self, text: &str, schema: &SchemaDefinition) -> String {
        let name = match &schema.title {
            Some(title) => format!("\"{}\" (schema id: {}, version {})", title, schema.id, schema.version),
            None => format!("schema \"{}\" (version {})", schema.id, schema.version),
        };

        let fields: Vec<String> = schema.fields.iter().map(describe_field).collect();
        let fields = if fields.is_empty() {
            "(no declared fields)".to_string()
        } else {
            numbered_list(&fields)
        };

        let mut rules = vec![
            "- Respond with a single JSON object whose keys are the field names listed above."
                .to_string(),
            "- Every required field must be present.".to_string(),
            "- Omit optional fields that the document does not contain.".to_string(),
        ];
        if !schema.additional_properties {
            rules.push("- Do not include any property that is not listed above.".to_string());
        }

        [
            format!(
                "{}\nExtract the fields of {} from the document text below.",
                self.instruction, name
            ),
            section("Fields", &fields),
            section("Output rules", &rules.join("\n")),
            section("Document text", text),
        ]
        .join("\n\n")
    }
}

fn describe_field(field: &FieldSpec) -> String {
    let presence = if field.required { "required" } else { "optional" };
    match &field.description {
        Some(desc) => format!("{} ({}, {}): {}", field.name, field.type_label(), presence, desc),
        None => format!("{} ({}, {})", field.name, field.type_label(), presence),
    }
}

fn correction(ctx: &RetryContext) -> String {
    const JSON_ONLY: &str =
        "Respond with the JSON object only. Do not add prose, explanations, or markdown fences.";

    match ctx {
        RetryContext::Parse { detail } => format!(
            "Your previous reply could not be parsed as JSON ({}).\n{}\nThe reply must start with {{ and end with }}.",
            detail, JSON_ONLY
        ),
        RetryContext::Validation { violation } => {
            let fix = match (violation.rule, violation.field.as_deref()) {
                (ValidationRule::ExtraField, Some(field)) => {
                    format!("Remove the property '{}'.", field)
                }
                (ValidationRule::MissingRequired, Some(field)) => {
                    format!("Include the required property '{}'.", field)
                }
                (ValidationRule::TypeMismatch, Some(field)) => {
                    format!("Correct the type of '{}' as listed under Fields.", field)
                }
                _ => "The top-level value must be a JSON object.".to_string(),
            };
            format!(
                "Your previous reply did not match the schema: {}.\n{}\nUse exactly the properties listed under Fields and no others.\n{}",
                violation.detail, fix, JSON_ONLY
            )
        }
        RetryContext::Client { cause } => format!(
            "The previous request failed before a reply was received ({}).\n{}",
            cause, JSON_ONLY
        ),
    }
}

/// Prompt asking the model to name the best-matching schema id.
///
/// Only a head and tail snippet of `text` is included, `snippet_chars`
/// characters each; short texts are included whole.
pub fn classification_prompt(ids: &[&str], text: &str, snippet_chars: usize) -> String {
    let ids_list = ids
        .iter()
        .map(|id| format!("- {}", id))
        .collect::<Vec<_>>()
        .join("\n");
    [
        "You are given document text and a set of available schema IDs.".to_string(),
        section("Schema IDs", &ids_list),
        section("Document text", &snippet(text, snippet_chars)),
        "Which schema_id best matches this document? Respond with only the schema_id.".to_string(),
    ]
    .join("\n\n")
}

fn snippet(text: &str, each: usize) -> String {
    let total = text.chars().count();
    if total <= each.saturating_mul(2) {
        return text.to_string();
    }
    let head: String = text.chars().take(each).collect();
    let tail: String = text.chars().skip(total - each).collect();
    format!("{}\n...\n{}", head, tail)
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::validator::validate;
    use serde_json::json;

    fn w2() -> SchemaDefinition {
        SchemaDefinition::new("w2", "1.0")
            .with_title("W2 Form")
            .with_field(FieldSpec::required("employer_name", FieldType::String))
            .with_field(
                FieldSpec::required("wages", FieldType::Number).with_description("Box 1"),
            )
            .with_field(FieldSpec::optional("control_number", FieldType::String).nullable())
    }

    const DOC: &str = "Employer: Acme Corp\nWages: 50000";

    #[test]
    fn test_baseline_lists_fields_in_order() {
        let prompt = PromptBuilder::new().build(DOC, &w2(), &Attempt::Initial);
        assert!(prompt.starts_with("You are an information extraction engine."));
        assert!(prompt.contains("\"W2 Form\" (schema id: w2, version 1.0)"));
        assert!(prompt.contains(
            "1. employer_name (string, required)\n2. wages (number, required): Box 1\n3. control_number (string | null, optional)"
        ));
        assert!(prompt.contains("Do not include any property that is not listed above."));
        assert!(prompt.ends_with(&format!("## Document text\n{}", DOC)));
    }

    #[test]
    fn test_open_schema_omits_extra_property_rule() {
        let schema = w2().with_additional_properties(true);
        let prompt = PromptBuilder::new().build(DOC, &schema, &Attempt::Initial);
        assert!(!prompt.contains("not listed above"));
    }

    #[test]
    fn test_deterministic() {
        let builder = PromptBuilder::new();
        let a = builder.build(DOC, &w2(), &Attempt::Initial);
        let b = builder.build(DOC, &w2(), &Attempt::Initial);
        assert_eq!(a, b);
    }

    #[test]
    fn test_retry_prompts_extend_baseline() {
        let builder = PromptBuilder::new();
        let baseline = builder.build(DOC, &w2(), &Attempt::Initial);
        let violation = validate(&json!({"employer_name": "Acme"}), &w2()).unwrap_err();
        let contexts = [
            RetryContext::Parse {
                detail: "expected value at line 1 column 1".into(),
            },
            RetryContext::Validation { violation },
            RetryContext::Client {
                cause: "HTTP 503: busy".into(),
            },
        ];
        for ctx in contexts {
            let retry = builder.build(DOC, &w2(), &Attempt::Retry(ctx));
            assert!(retry.starts_with(&baseline));
            assert!(retry.len() > baseline.len());
            assert!(retry.contains("## Correction"));
            assert!(retry.contains("JSON object only"));
        }
    }

    #[test]
    fn test_validation_retry_names_rule_and_field() {
        let mut value = json!({"employer_name": "Acme", "wages": 1});
        value["notes"] = json!("extra");
        let violation = validate(&value, &w2()).unwrap_err();
        let prompt = PromptBuilder::new().build(
            DOC,
            &w2(),
            &Attempt::Retry(RetryContext::Validation { violation }),
        );
        assert!(prompt.contains("Remove the property 'notes'."));
        assert!(prompt.contains("and no others"));
    }

    #[test]
    fn test_parse_retry_mentions_detail() {
        let prompt = PromptBuilder::new().build(
            DOC,
            &w2(),
            &Attempt::Retry(RetryContext::Parse {
                detail: "trailing characters".into(),
            }),
        );
        assert!(prompt.contains("could not be parsed as JSON (trailing characters)"));
        assert!(prompt.contains("start with { and end with }"));
    }

    #[test]
    fn test_custom_instruction() {
        let prompt = PromptBuilder::new()
            .with_instruction("You read tax forms.")
            .build(DOC, &w2(), &Attempt::Initial);
        assert!(prompt.starts_with("You read tax forms.\nExtract"));
    }

    #[test]
    fn test_classification_prompt_snippets() {
        let long = format!("{}{}{}", "A".repeat(300), "MIDDLE", "Z".repeat(300));
        let prompt = classification_prompt(&["1040", "w2"], &long, 200);
        assert!(prompt.contains("- 1040\n- w2"));
        assert!(prompt.contains(&"A".repeat(200)));
        assert!(prompt.contains(&"Z".repeat(200)));
        assert!(!prompt.contains("MIDDLE"));
        assert!(prompt.ends_with("Respond with only the schema_id."));

        let short = classification_prompt(&["w2"], "W-2 Wage and Tax Statement", 200);
        assert!(short.contains("W-2 Wage and Tax Statement"));
        assert!(!short.contains("\n...\n"));
    }

    #[test]
    fn test_huge_snippet_size_keeps_whole_text() {
        let prompt = classification_prompt(&["w2"], "W-2 Wage and Tax Statement", usize::MAX);
        assert!(prompt.contains("W-2 Wage and Tax Statement"));
        assert!(!prompt.contains("\n...\n"));
    }

    #[test]
    fn test_numbered_list_and_section() {
        let items = vec!["First".to_string(), "Second".to_string()];
        assert_eq!(numbered_list(&items), "1. First\n2. Second");
        assert_eq!(numbered_list(&[]), "");
        assert_eq!(section("Context", "body"), "## Context\nbody");
    }
}
