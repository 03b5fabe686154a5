//! The extraction state machine.
//!
//! A run moves through `Classifying -> Extracting(1) -> Extracting(2)` and
//! ends in [`PipelineResult::Succeeded`] or [`PipelineResult::Failed`].
//! Classification failures end the run immediately. Any failure of the
//! first extraction attempt (client, parse or validation) earns exactly one
//! retry with a prompt tailored to that failure; there is no second retry.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::classifier::{Classifier, LlmClassifier};
use crate::client::ExtractionClient;
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler, RunReport};
use crate::output_parser::ResponseParser;
use crate::prompt::{Attempt, PromptBuilder, RetryContext};
use crate::registry::SchemaRegistry;
use crate::retry::{RetryPolicy, MAX_ATTEMPTS};
use crate::schema::SchemaDefinition;
use crate::tokens::{TokenCounter, TokenUsage};
use crate::types::{
    AttemptOutcome, Extraction, ExtractionAttempt, FailureReport, FailureStage, PipelineResult,
};
use crate::validator::{validate, ValidatedValue};

/// Runs documents through classification, extraction and validation.
///
/// `Extractor` is `Send + Sync`; wrap it in an `Arc` to serve concurrent
/// runs. Each run owns its attempts and shares only read-only state.
///
/// ```
/// # tokio_test::block_on(async {
/// use schema_extract::backend::MockBackend;
/// use schema_extract::client::ExtractionClient;
/// use schema_extract::orchestrator::Extractor;
/// use schema_extract::registry::SchemaRegistry;
/// use schema_extract::schema::{FieldSpec, FieldType, SchemaDefinition};
/// use std::sync::Arc;
///
/// let registry = SchemaRegistry::from_definitions(vec![SchemaDefinition::new("w2", "1.0")
///     .with_field(FieldSpec::required("wages", FieldType::Number))])
/// .unwrap();
/// let mock = Arc::new(MockBackend::new(vec!["w2".into(), r#"{"wages": 50000}"#.into()]));
/// let client = ExtractionClient::builder("http://unused").backend(mock).build().unwrap();
///
/// let extractor = Extractor::builder(Arc::new(registry), Arc::new(client)).build().unwrap();
/// let result = extractor.run("W-2 Wage and Tax Statement\nWages: 50000").await;
///
/// let extraction = result.success().unwrap();
/// assert_eq!(extraction.schema_id, "w2");
/// assert_eq!(extraction.attempts_used(), 1);
/// # });
/// ```
pub struct Extractor {
    registry: Arc<SchemaRegistry>,
    classifier: Arc<dyn Classifier>,
    client: Arc<ExtractionClient>,
    prompts: PromptBuilder,
    parser: ResponseParser,
    retry: RetryPolicy,
    counter: TokenCounter,
    handler: Option<Arc<dyn EventHandler>>,
}

/// Result of one extraction attempt, before it is recorded.
enum Step {
    Valid(ValidatedValue),
    Failed {
        context: RetryContext,
        delay: Duration,
    },
}

impl Extractor {
    pub fn builder(registry: Arc<SchemaRegistry>, client: Arc<ExtractionClient>) -> ExtractorBuilder {
        ExtractorBuilder {
            registry,
            client,
            classifier: None,
            prompts: PromptBuilder::default(),
            parser: ResponseParser::default(),
            retry: RetryPolicy::default(),
            counter: TokenCounter::default(),
            handler: None,
        }
    }

    /// Classify `text`, then extract and validate.
    ///
    /// Never returns `Err`: every failure is reported as
    /// [`PipelineResult::Failed`].
    pub async fn run(&self, text: &str) -> PipelineResult {
        self.execute(text, None).await
    }

    /// Skip classification and extract against `schema_id`.
    ///
    /// An unregistered id fails at the classification stage with zero
    /// attempts.
    pub async fn run_with_schema(&self, text: &str, schema_id: &str) -> PipelineResult {
        self.execute(text, Some(schema_id)).await
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn execute(&self, text: &str, requested: Option<&str>) -> PipelineResult {
        self.run_identified(Uuid::new_v4(), text, requested).await
    }

    /// Run under a caller-chosen id, so stored inputs and results line up.
    pub(crate) async fn run_identified(
        &self,
        run_id: Uuid,
        text: &str,
        requested: Option<&str>,
    ) -> PipelineResult {
        let span = tracing::info_span!("extraction_run", %run_id);
        self.execute_inner(run_id, text, requested)
            .instrument(span)
            .await
    }

    async fn execute_inner(&self, run_id: Uuid, text: &str, requested: Option<&str>) -> PipelineResult {
        let started_at = Utc::now();
        emit(
            &self.handler,
            Event::RunStarted {
                run_id,
                requested_schema: requested.map(str::to_string),
            },
        );
        tracing::info!(chars = text.len(), requested = ?requested, "run started");

        let (schema, classification_tokens) = match self.resolve_schema(run_id, text, requested).await {
            Ok(resolved) => resolved,
            Err((err, tokens)) => {
                tracing::warn!(error = %err, "classification failed");
                let result = PipelineResult::Failed(FailureReport {
                    stage: FailureStage::Classification,
                    schema_id: None,
                    summary: err.to_string(),
                    attempts: Vec::new(),
                });
                return self.finish(run_id, started_at, None, tokens, result);
            }
        };

        let schema_version = Some(schema.version.clone());
        let result = self.extract(run_id, text, &schema).await;
        self.finish(run_id, started_at, schema_version, classification_tokens, result)
    }

    /// Pick the governing schema. Failures carry whatever classification
    /// tokens were spent.
    async fn resolve_schema(
        &self,
        run_id: Uuid,
        text: &str,
        requested: Option<&str>,
    ) -> std::result::Result<(Arc<SchemaDefinition>, Option<TokenUsage>), (PipelineError, Option<TokenUsage>)> {
        if let Some(id) = requested {
            return self.registry.lookup(id).map(|s| (s, None)).map_err(|e| (e, None));
        }

        match self.classifier.classify(text, &self.registry).await {
            Ok(found) => {
                emit(
                    &self.handler,
                    Event::ClassificationAttempted {
                        run_id,
                        classifier: self.classifier.name(),
                        schema_id: Some(found.schema_id.clone()),
                        error: None,
                    },
                );
                tracing::info!(schema_id = %found.schema_id, classifier = self.classifier.name(), "document classified");
                match self.registry.lookup(&found.schema_id) {
                    Ok(schema) => Ok((schema, found.usage)),
                    Err(_) => Err((
                        PipelineError::Classification(format!(
                            "classifier chose unregistered schema '{}'",
                            found.schema_id
                        )),
                        found.usage,
                    )),
                }
            }
            Err(err) => {
                emit(
                    &self.handler,
                    Event::ClassificationAttempted {
                        run_id,
                        classifier: self.classifier.name(),
                        schema_id: None,
                        error: Some(err.to_string()),
                    },
                );
                Err((err, None))
            }
        }
    }

    async fn extract(&self, run_id: Uuid, text: &str, schema: &SchemaDefinition) -> PipelineResult {
        let mut attempts: Vec<ExtractionAttempt> = Vec::with_capacity(MAX_ATTEMPTS as usize);
        let mut attempt = Attempt::Initial;

        for number in 1..=MAX_ATTEMPTS {
            emit(
                &self.handler,
                Event::AttemptStarted {
                    run_id,
                    attempt: number,
                    schema_id: schema.id.clone(),
                },
            );

            let (record, step) = self.attempt(number, text, schema, &attempt).await;
            emit(
                &self.handler,
                Event::AttemptFinished {
                    run_id,
                    attempt: number,
                    outcome: record.outcome,
                    detail: record.detail.clone(),
                },
            );
            let outcome = record.outcome;
            attempts.push(record);

            match step {
                Step::Valid(data) => {
                    tracing::info!(schema_id = %schema.id, attempt = number, "extraction validated");
                    return PipelineResult::Succeeded(Extraction {
                        schema_id: schema.id.clone(),
                        schema_version: schema.version.clone(),
                        data,
                        attempts,
                    });
                }
                Step::Failed { context, delay } if number < MAX_ATTEMPTS => {
                    emit(
                        &self.handler,
                        Event::RetryScheduled {
                            run_id,
                            after: outcome,
                            delay_ms: delay.as_millis() as u64,
                        },
                    );
                    tracing::info!(attempt = number, %outcome, delay_ms = delay.as_millis() as u64, "retrying extraction");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt = Attempt::Retry(context);
                }
                Step::Failed { .. } => break,
            }
        }

        let stage = attempts
            .last()
            .and_then(|a| a.outcome.failure_stage())
            .unwrap_or(FailureStage::Extraction);
        let summary = format!(
            "extraction failed after {} attempts: {}",
            attempts.len(),
            attempts
                .iter()
                .map(ExtractionAttempt::summary)
                .collect::<Vec<_>>()
                .join("; ")
        );
        tracing::warn!(schema_id = %schema.id, %stage, "extraction failed");

        PipelineResult::Failed(FailureReport {
            stage,
            schema_id: Some(schema.id.clone()),
            summary,
            attempts,
        })
    }

    async fn attempt(
        &self,
        number: u8,
        text: &str,
        schema: &SchemaDefinition,
        attempt: &Attempt,
    ) -> (ExtractionAttempt, Step) {
        let prompt = self.prompts.build(text, schema, attempt);
        let started = Instant::now();
        let sent = self.client.send(&prompt).await;

        let mut record = ExtractionAttempt {
            number,
            prompt_tokens: 0,
            prompt,
            raw_response: None,
            response_tokens: 0,
            outcome: AttemptOutcome::Success,
            detail: None,
            repaired: false,
            elapsed: Duration::ZERO,
        };

        let raw = match sent {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(attempt = number, error = %err, "provider call failed");
                record.prompt_tokens = self.counter.count(&record.prompt);
                record.outcome = AttemptOutcome::ClientFailure;
                record.detail = Some(err.to_string());
                record.elapsed = started.elapsed();
                let step = Step::Failed {
                    delay: self.retry.client_delay(&err),
                    context: RetryContext::Client {
                        cause: err.to_string(),
                    },
                };
                return (record, step);
            }
        };

        match raw.usage {
            Some(usage) => {
                record.prompt_tokens = usage.prompt_tokens;
                record.response_tokens = usage.completion_tokens;
            }
            None => {
                record.prompt_tokens = self.counter.count(&record.prompt);
                record.response_tokens = self.counter.count(&raw.text);
            }
        }
        let step = match self.parser.parse(&raw.text) {
            Err(err) => {
                tracing::warn!(attempt = number, error = %err, "response did not parse");
                record.outcome = AttemptOutcome::ParseFailure;
                record.detail = Some(err.to_string());
                Step::Failed {
                    context: RetryContext::Parse {
                        detail: err.to_string(),
                    },
                    delay: Duration::ZERO,
                }
            }
            Ok(parsed) => {
                record.repaired = parsed.repaired;
                match validate(&parsed.value, schema) {
                    Ok(valid) => Step::Valid(valid),
                    Err(violation) => {
                        tracing::warn!(attempt = number, rule = %violation.rule, field = ?violation.field, "response failed validation");
                        record.outcome = AttemptOutcome::ValidationFailure;
                        record.detail = Some(violation.to_string());
                        Step::Failed {
                            context: RetryContext::Validation { violation },
                            delay: Duration::ZERO,
                        }
                    }
                }
            }
        };
        record.raw_response = Some(raw.text);
        record.elapsed = started.elapsed();
        (record, step)
    }

    fn finish(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        schema_version: Option<String>,
        classification_tokens: Option<TokenUsage>,
        result: PipelineResult,
    ) -> PipelineResult {
        let report = RunReport::from_result(run_id, started_at, schema_version, classification_tokens, &result);
        tracing::info!(
            succeeded = report.succeeded,
            attempts = report.attempts_used,
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        emit(&self.handler, Event::RunCompleted(report));
        result
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("schemas", &self.registry.ids().collect::<Vec<_>>())
            .field("classifier", &self.classifier.name())
            .field("client", &self.client)
            .field("retry", &self.retry)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Builder for [`Extractor`].
pub struct ExtractorBuilder {
    registry: Arc<SchemaRegistry>,
    client: Arc<ExtractionClient>,
    classifier: Option<Arc<dyn Classifier>>,
    prompts: PromptBuilder,
    parser: ResponseParser,
    retry: RetryPolicy,
    counter: TokenCounter,
    handler: Option<Arc<dyn EventHandler>>,
}

impl ExtractorBuilder {
    /// Default: an [`LlmClassifier`] sharing the extraction client.
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Counter used when the provider reports no usage.
    pub fn token_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// # Errors
    ///
    /// [`PipelineError::InvalidConfig`] if the registry is empty.
    pub fn build(self) -> Result<Extractor> {
        if self.registry.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "schema registry holds no schemas".into(),
            ));
        }
        let counter = self.counter;
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(LlmClassifier::new(self.client.clone()).with_token_counter(counter))
        });
        Ok(Extractor {
            registry: self.registry,
            classifier,
            client: self.client,
            prompts: self.prompts,
            parser: self.parser,
            retry: self.retry,
            counter,
            handler: self.handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::classifier::KeywordClassifier;
    use crate::events::RecordingHandler;
    use crate::schema::{FieldSpec, FieldType};
    use crate::validator::ValidationRule;
    use serde_json::json;

    const W2_TEXT: &str = "Form W-2 Wage and Tax Statement\nEmployer: Acme Corp\nWages: 50000";
    const W2_JSON: &str = r#"{"employer_name": "Acme Corp", "wages": 50000}"#;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::from_definitions(vec![
                SchemaDefinition::new("w2", "2023.1")
                    .with_keywords(&["W-2", "wage and tax statement"])
                    .with_field(FieldSpec::required("employer_name", FieldType::String))
                    .with_field(FieldSpec::required("wages", FieldType::Number))
                    .with_field(FieldSpec::optional("control_number", FieldType::String)),
                SchemaDefinition::new("1040", "2023.1")
                    .with_keywords(&["1040", "individual income tax return"])
                    .with_field(FieldSpec::required("taxpayer_name", FieldType::String))
                    .with_field(FieldSpec::required("total_income", FieldType::Number)),
            ])
            .unwrap(),
        )
    }

    fn client(mock: Arc<MockBackend>) -> Arc<ExtractionClient> {
        Arc::new(
            ExtractionClient::builder("http://unused")
                .backend(mock)
                .build()
                .unwrap(),
        )
    }

    /// Keyword classification so the mock only scripts extraction replies.
    fn extractor(mock: Arc<MockBackend>) -> (Extractor, Arc<RecordingHandler>) {
        let recorder = Arc::new(RecordingHandler::new());
        let extractor = Extractor::builder(registry(), client(mock))
            .classifier(Arc::new(KeywordClassifier::new()))
            .retry_policy(RetryPolicy::immediate())
            .event_handler(recorder.clone())
            .build()
            .unwrap();
        (extractor, recorder)
    }

    #[tokio::test]
    async fn test_plain_json_succeeds_first_try() {
        let mock = Arc::new(MockBackend::fixed(W2_JSON));
        let (extractor, _) = extractor(mock.clone());
        let result = extractor.run(W2_TEXT).await;

        let extraction = result.success().unwrap();
        assert_eq!(extraction.schema_id, "w2");
        assert_eq!(extraction.schema_version, "2023.1");
        assert_eq!(extraction.attempts_used(), 1);
        assert_eq!(extraction.data.get("wages"), Some(&json!(50000)));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_fenced_json_succeeds() {
        let reply = format!("Here you go:\n```json\n{}\n```", W2_JSON);
        let (extractor, _) = extractor(Arc::new(MockBackend::fixed(reply)));
        let result = extractor.run(W2_TEXT).await;
        assert!(result.is_success());
        assert_eq!(result.attempts_used(), 1);
    }

    // Scenario A
    #[tokio::test]
    async fn test_extra_field_then_exact_match() {
        let mock = Arc::new(MockBackend::new(vec![
            r#"{"employer_name": "Acme Corp", "wages": 50000, "notes": "looks fine"}"#.into(),
            W2_JSON.into(),
        ]));
        let (extractor, _) = extractor(mock.clone());
        let result = extractor.run(W2_TEXT).await;

        let extraction = result.success().unwrap();
        assert_eq!(extraction.attempts_used(), 2);
        assert_eq!(extraction.attempts[0].outcome, AttemptOutcome::ValidationFailure);
        assert!(extraction.attempts[0].detail.as_deref().unwrap().contains("extra-field"));
        assert_eq!(extraction.data.to_value(), json!({"employer_name": "Acme Corp", "wages": 50000}));

        let prompts = mock.prompts();
        assert!(prompts[1].starts_with(&prompts[0]));
        assert!(prompts[1].contains("Remove the property 'notes'."));
    }

    // Scenario B
    #[tokio::test]
    async fn test_unclassifiable_text_fails_without_attempts() {
        let mock = Arc::new(MockBackend::fixed(W2_JSON));
        let (extractor, recorder) = extractor(mock.clone());
        let result = extractor.run("Grocery receipt\nMilk 2.99").await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, FailureStage::Classification);
        assert_eq!(failure.attempts_used(), 0);
        assert!(failure.schema_id.is_none());
        assert_eq!(mock.calls(), 0);

        let reports = recorder.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].failed_stage, Some(FailureStage::Classification));
    }

    // Scenario C
    #[tokio::test]
    async fn test_rate_limit_then_success_uses_single_retry() {
        let mock = Arc::new(MockBackend::scripted(vec![
            MockReply::rate_limited(Duration::from_millis(10)),
            MockReply::text(W2_JSON),
        ]));
        let (extractor, recorder) = extractor(mock.clone());
        let result = extractor.run(W2_TEXT).await;

        let extraction = result.success().unwrap();
        assert_eq!(extraction.attempts_used(), 2);
        let first = &extraction.attempts[0];
        assert_eq!(first.outcome, AttemptOutcome::ClientFailure);
        assert!(first.raw_response.is_none());
        assert!(first.detail.as_deref().unwrap().contains("429"));
        assert_eq!(mock.calls(), 2);

        let report = &recorder.reports()[0];
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::ClientFailure);
        assert_eq!(report.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn test_retry_after_hint_delays_retry() {
        let mock = Arc::new(MockBackend::scripted(vec![
            MockReply::rate_limited(Duration::from_millis(50)),
            MockReply::text(W2_JSON),
        ]));
        let recorder = Arc::new(RecordingHandler::new());
        let extractor = Extractor::builder(registry(), client(mock))
            .classifier(Arc::new(KeywordClassifier::new()))
            .event_handler(recorder.clone())
            .build()
            .unwrap();

        let started = Instant::now();
        let result = extractor.run(W2_TEXT).await;
        assert!(result.is_success());
        assert!(started.elapsed() >= Duration::from_millis(50));

        let scheduled = recorder.events().into_iter().find_map(|e| match e {
            Event::RetryScheduled { delay_ms, after, .. } => Some((delay_ms, after)),
            _ => None,
        });
        assert_eq!(scheduled, Some((50, AttemptOutcome::ClientFailure)));
    }

    // Scenario D
    #[tokio::test]
    async fn test_two_parse_failures() {
        let mock = Arc::new(MockBackend::fixed("I could not find any fields, sorry."));
        let (extractor, _) = extractor(mock.clone());
        let result = extractor.run(W2_TEXT).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, FailureStage::Parse);
        assert_eq!(failure.attempts_used(), 2);
        assert_eq!(failure.schema_id.as_deref(), Some("w2"));
        assert_eq!(failure.attempt_summaries().len(), 2);
        assert!(failure.summary.contains("attempt 1: parse failure"));
        assert!(failure.summary.contains("attempt 2: parse failure"));
        assert_eq!(mock.calls(), 2);
        assert!(mock.prompts()[1].contains("could not be parsed as JSON"));
    }

    #[tokio::test]
    async fn test_two_validation_failures() {
        let mock = Arc::new(MockBackend::fixed(r#"{"employer_name": "Acme Corp"}"#));
        let (extractor, _) = extractor(mock);
        let result = extractor.run(W2_TEXT).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, FailureStage::Validation);
        assert_eq!(failure.attempts_used(), 2);
        assert!(failure.attempts[1].detail.as_deref().unwrap().contains("wages"));
    }

    #[tokio::test]
    async fn test_parse_failure_then_validation_failure_reports_last_stage() {
        let mock = Arc::new(MockBackend::new(vec![
            "not json".into(),
            r#"{"employer_name": 7, "wages": 1}"#.into(),
        ]));
        let (extractor, _) = extractor(mock.clone());
        let failure = extractor.run(W2_TEXT).await.failure().cloned().unwrap();
        assert_eq!(failure.stage, FailureStage::Validation);
        assert_eq!(failure.attempts[0].outcome, AttemptOutcome::ParseFailure);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_client_failure_twice_reports_extraction_stage() {
        let mock = Arc::new(MockBackend::scripted(vec![MockReply::http(503, "busy")]));
        let (extractor, _) = extractor(mock.clone());
        let failure = extractor.run(W2_TEXT).await.failure().cloned().unwrap();
        assert_eq!(failure.stage, FailureStage::Extraction);
        assert_eq!(failure.attempts_used(), 2);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_never_more_than_two_calls_across_failure_classes() {
        let mock = Arc::new(MockBackend::scripted(vec![
            MockReply::http(500, "oops"),
            MockReply::text("garbage"),
            MockReply::text(W2_JSON),
        ]));
        let (extractor, _) = extractor(mock.clone());
        let result = extractor.run(W2_TEXT).await;
        assert!(!result.is_success());
        assert_eq!(result.attempts_used(), 2);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_repaired_response_is_flagged() {
        let mock = Arc::new(MockBackend::fixed(
            "{'employer_name': 'Acme Corp', 'wages': 50000,}",
        ));
        let extractor = Extractor::builder(registry(), client(mock))
            .classifier(Arc::new(KeywordClassifier::new()))
            .parser(ResponseParser::new().with_repair(true))
            .retry_policy(RetryPolicy::immediate())
            .build()
            .unwrap();
        let extraction = extractor.run(W2_TEXT).await.success().cloned().unwrap();
        assert!(extraction.attempts[0].repaired);
    }

    #[tokio::test]
    async fn test_almost_json_fails_parse_twice_by_default() {
        let mock = Arc::new(MockBackend::fixed("{'employer_name': 'Acme Corp', 'wages': 50000,}"));
        let (extractor, recorder) = extractor(mock.clone());
        let failure = extractor.run(W2_TEXT).await.failure().cloned().unwrap();
        assert_eq!(failure.stage, FailureStage::Parse);
        assert_eq!(failure.attempts_used(), 2);
        assert!(failure.attempts.iter().all(|a| !a.repaired));
        assert_eq!(mock.calls(), 2);
        assert_eq!(recorder.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_llm_classifier_by_default() {
        let mock = Arc::new(MockBackend::new(vec!["1040".into(), r#"{"taxpayer_name": "Jane Doe", "total_income": 72000.5}"#.into()]));
        let recorder = Arc::new(RecordingHandler::new());
        let extractor = Extractor::builder(registry(), client(mock.clone()))
            .event_handler(recorder.clone())
            .build()
            .unwrap();
        let result = extractor
            .run("Form 1040 U.S. Individual Income Tax Return\nJane Doe")
            .await;
        assert_eq!(result.schema_id(), Some("1040"));
        assert!(result.is_success());
        assert_eq!(mock.calls(), 2);

        let report = &recorder.reports()[0];
        assert!(report.classification_tokens.is_some());
        assert_eq!(report.schema_version.as_deref(), Some("2023.1"));
        assert!(report.total_prompt_tokens() > report.attempts[0].prompt_tokens);
    }

    #[tokio::test]
    async fn test_llm_classifier_unknown_answer() {
        let mock = Arc::new(MockBackend::fixed("invoice"));
        let extractor = Extractor::builder(registry(), client(mock.clone())).build().unwrap();
        let failure = extractor.run("Invoice #42").await.failure().cloned().unwrap();
        assert_eq!(failure.stage, FailureStage::Classification);
        assert_eq!(failure.attempts_used(), 0);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_run_with_schema_skips_classification() {
        let mock = Arc::new(MockBackend::fixed(W2_JSON));
        let recorder = Arc::new(RecordingHandler::new());
        let extractor = Extractor::builder(registry(), client(mock.clone()))
            .event_handler(recorder.clone())
            .build()
            .unwrap();
        let result = extractor.run_with_schema("no keywords here", "w2").await;
        assert!(result.is_success());
        assert_eq!(mock.calls(), 1);
        assert!(!recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::ClassificationAttempted { .. })));
    }

    #[tokio::test]
    async fn test_run_with_unknown_schema() {
        let mock = Arc::new(MockBackend::fixed(W2_JSON));
        let (extractor, _) = extractor(mock.clone());
        let failure = extractor
            .run_with_schema(W2_TEXT, "w9")
            .await
            .failure()
            .cloned()
            .unwrap();
        assert_eq!(failure.stage, FailureStage::Classification);
        assert!(failure.summary.contains("w9"));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_event_sequence_and_single_report() {
        let mock = Arc::new(MockBackend::new(vec!["{}".into(), W2_JSON.into()]));
        let (extractor, recorder) = extractor(mock);
        extractor.run(W2_TEXT).await;

        let names: Vec<&str> = recorder
            .events()
            .iter()
            .map(|e| match e {
                Event::RunStarted { .. } => "run_started",
                Event::ClassificationAttempted { .. } => "classified",
                Event::AttemptStarted { .. } => "attempt_started",
                Event::AttemptFinished { .. } => "attempt_finished",
                Event::RetryScheduled { .. } => "retry",
                Event::RunCompleted(_) => "completed",
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "run_started",
                "classified",
                "attempt_started",
                "attempt_finished",
                "retry",
                "attempt_started",
                "attempt_finished",
                "completed"
            ]
        );
        let report = &recorder.reports()[0];
        assert!(report.succeeded);
        assert_eq!(report.attempts_used, 2);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::ValidationFailure);
    }

    #[tokio::test]
    async fn test_validation_retry_context_names_missing_field() {
        let mock = Arc::new(MockBackend::new(vec![
            r#"{"wages": 50000}"#.into(),
            W2_JSON.into(),
        ]));
        let (extractor, _) = extractor(mock.clone());
        extractor.run(W2_TEXT).await;
        assert!(mock.prompts()[1].contains("Include the required property 'employer_name'."));
    }

    #[tokio::test]
    async fn test_result_data_is_validated_against_chosen_schema() {
        let (extractor, _) = extractor(Arc::new(MockBackend::fixed(W2_JSON)));
        let extraction = extractor.run(W2_TEXT).await.success().cloned().unwrap();
        let schema = extractor.registry().lookup("w2").unwrap();
        assert_eq!(extraction.data.schema_id(), "w2");
        assert!(validate(&extraction.data.to_value(), &schema).is_ok());
        assert!(matches!(
            validate(&json!([]), &schema).unwrap_err().rule,
            ValidationRule::RootNotObject
        ));
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_extractor() {
        let mock = Arc::new(MockBackend::fixed(W2_JSON));
        let (extractor, recorder) = extractor(mock.clone());
        let extractor = Arc::new(extractor);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let extractor = extractor.clone();
                tokio::spawn(async move { extractor.run(W2_TEXT).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(mock.calls(), 8);

        let reports = recorder.reports();
        assert_eq!(reports.len(), 8);
        let mut ids: Vec<Uuid> = reports.iter().map(|r| r.run_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_empty_registry_rejected() {
        let registry = Arc::new(SchemaRegistry::from_definitions(Vec::new()).unwrap());
        let err = Extractor::builder(registry, client(Arc::new(MockBackend::fixed("{}"))))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_extractor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Extractor>();
    }
}
