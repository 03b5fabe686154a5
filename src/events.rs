//! Observability hooks for pipeline runs.
//!
//! Runs emit [`Event`]s as they progress and exactly one
//! [`Event::RunCompleted`] carrying a [`RunReport`] when they finish.
//! Implement [`EventHandler`] to forward these to metrics, audit logs, or a
//! UI. Handlers are optional; runs behave identically without one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::tokens::TokenUsage;
use crate::types::{AttemptOutcome, FailureStage, PipelineResult};

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: Uuid,
        /// Set when the caller skipped classification.
        requested_schema: Option<String>,
    },
    ClassificationAttempted {
        run_id: Uuid,
        classifier: &'static str,
        /// Chosen schema, or `None` on failure.
        schema_id: Option<String>,
        error: Option<String>,
    },
    AttemptStarted {
        run_id: Uuid,
        attempt: u8,
        schema_id: String,
    },
    AttemptFinished {
        run_id: Uuid,
        attempt: u8,
        outcome: AttemptOutcome,
        detail: Option<String>,
    },
    RetryScheduled {
        run_id: Uuid,
        /// Outcome of the attempt being retried.
        after: AttemptOutcome,
        delay_ms: u64,
    },
    RunCompleted(RunReport),
}

/// Token and outcome figures for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptMetrics {
    pub number: u8,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub outcome: AttemptOutcome,
    pub repaired: bool,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub succeeded: bool,
    pub schema_id: Option<String>,
    pub schema_version: Option<String>,
    /// Tokens spent on classification, when an LLM classifier reported them.
    pub classification_tokens: Option<TokenUsage>,
    pub attempts_used: u8,
    pub attempts: Vec<AttemptMetrics>,
    pub failed_stage: Option<FailureStage>,
}

impl RunReport {
    pub(crate) fn from_result(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        schema_version: Option<String>,
        classification_tokens: Option<TokenUsage>,
        result: &PipelineResult,
    ) -> Self {
        let attempts: Vec<AttemptMetrics> = result
            .attempts()
            .iter()
            .map(|a| AttemptMetrics {
                number: a.number,
                prompt_tokens: a.prompt_tokens,
                response_tokens: a.response_tokens,
                outcome: a.outcome,
                repaired: a.repaired,
            })
            .collect();
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

        Self {
            run_id,
            started_at,
            elapsed_ms,
            succeeded: result.is_success(),
            schema_id: result.schema_id().map(str::to_string),
            schema_version,
            classification_tokens,
            attempts_used: attempts.len() as u8,
            attempts,
            failed_stage: result.failure().map(|f| f.stage),
        }
    }

    pub fn total_prompt_tokens(&self) -> usize {
        self.attempts.iter().map(|a| a.prompt_tokens).sum::<usize>()
            + self.classification_tokens.map_or(0, |u| u.prompt_tokens)
    }

    pub fn total_response_tokens(&self) -> usize {
        self.attempts.iter().map(|a| a.response_tokens).sum::<usize>()
            + self.classification_tokens.map_or(0, |u| u.completion_tokens)
    }
}

/// Handler for run events.
///
/// # Example
///
/// ```
/// use schema_extract::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::RunCompleted(report) = event {
///             println!("run {} used {} attempt(s)", report.run_id, report.attempts_used);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use schema_extract::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::RetryScheduled { delay_ms, .. } = event {
///         eprintln!("retrying in {}ms", delay_ms);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Only the [`RunReport`]s.
    pub fn reports(&self) -> Vec<RunReport> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::RunCompleted(report) => Some(report),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureReport;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(
            &None,
            Event::RunStarted {
                run_id: Uuid::new_v4(),
                requested_schema: None,
            },
        );
    }

    #[test]
    fn test_recording_handler_collects_reports() {
        let recorder = Arc::new(RecordingHandler::new());
        let handler: Option<Arc<dyn EventHandler>> = Some(recorder.clone());
        let run_id = Uuid::new_v4();

        let result = PipelineResult::Failed(FailureReport {
            stage: FailureStage::Classification,
            schema_id: None,
            summary: "no schema matched".into(),
            attempts: Vec::new(),
        });
        emit(
            &handler,
            Event::RunStarted {
                run_id,
                requested_schema: None,
            },
        );
        emit(
            &handler,
            Event::RunCompleted(RunReport::from_result(
                run_id,
                Utc::now(),
                None,
                Some(TokenUsage {
                    prompt_tokens: 40,
                    completion_tokens: 2,
                }),
                &result,
            )),
        );

        assert_eq!(recorder.events().len(), 2);
        let reports = recorder.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts_used, 0);
        assert_eq!(reports[0].failed_stage, Some(FailureStage::Classification));
        assert_eq!(reports[0].total_prompt_tokens(), 40);
        assert_eq!(reports[0].total_response_tokens(), 2);
    }

    #[test]
    fn test_event_serialization_tag() {
        let v = serde_json::to_value(Event::RetryScheduled {
            run_id: Uuid::nil(),
            after: AttemptOutcome::ClientFailure,
            delay_ms: 1000,
        })
        .unwrap();
        assert_eq!(v["event"], "retry_scheduled");
        assert_eq!(v["after"], "client_failure");
    }
}
