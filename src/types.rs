use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::validator::ValidatedValue;

/// How a single extraction attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ParseFailure,
    ValidationFailure,
    ClientFailure,
}

impl AttemptOutcome {
    /// Pipeline stage blamed when this outcome ends a run.
    pub fn failure_stage(&self) -> Option<FailureStage> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::ParseFailure => Some(FailureStage::Parse),
            AttemptOutcome::ValidationFailure => Some(FailureStage::Validation),
            AttemptOutcome::ClientFailure => Some(FailureStage::Extraction),
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::ParseFailure => "parse failure",
            AttemptOutcome::ValidationFailure => "validation failure",
            AttemptOutcome::ClientFailure => "client failure",
        })
    }
}

/// Record of one call to the model within a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionAttempt {
    /// 1 or 2.
    pub number: u8,
    pub prompt: String,
    pub prompt_tokens: usize,
    /// `None` when the client failed before any text came back.
    pub raw_response: Option<String>,
    pub response_tokens: usize,
    pub outcome: AttemptOutcome,
    /// Error message for failed attempts.
    pub detail: Option<String>,
    /// The response needed JSON repair before it parsed.
    pub repaired: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl ExtractionAttempt {
    /// One-line summary, e.g. `attempt 1: validation failure (...)`.
    pub fn summary(&self) -> String {
        match &self.detail {
            Some(detail) => format!("attempt {}: {} ({})", self.number, self.outcome, detail),
            None => format!("attempt {}: {}", self.number, self.outcome),
        }
    }
}

/// Where a failed run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Classification,
    /// The provider call failed (transport, HTTP status, timeout).
    Extraction,
    Parse,
    Validation,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Classification => "classification",
            FailureStage::Extraction => "extraction",
            FailureStage::Parse => "parse",
            FailureStage::Validation => "validation",
        })
    }
}

/// Successful run output.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub schema_id: String,
    pub schema_version: String,
    pub data: ValidatedValue,
    pub attempts: Vec<ExtractionAttempt>,
}

impl Extraction {
    pub fn attempts_used(&self) -> u8 {
        self.attempts.len() as u8
    }
}

/// Failed run output.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub stage: FailureStage,
    /// Schema chosen before the failure, if classification got that far.
    pub schema_id: Option<String>,
    pub summary: String,
    pub attempts: Vec<ExtractionAttempt>,
}

impl FailureReport {
    pub fn attempts_used(&self) -> u8 {
        self.attempts.len() as u8
    }

    /// Per-attempt summaries in order.
    pub fn attempt_summaries(&self) -> Vec<String> {
        self.attempts.iter().map(ExtractionAttempt::summary).collect()
    }
}

/// Outcome of one pipeline run: exactly one of success or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineResult {
    Succeeded(Extraction),
    Failed(FailureReport),
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Succeeded(_))
    }

    pub fn attempts(&self) -> &[ExtractionAttempt] {
        match self {
            PipelineResult::Succeeded(e) => &e.attempts,
            PipelineResult::Failed(f) => &f.attempts,
        }
    }

    pub fn attempts_used(&self) -> u8 {
        self.attempts().len() as u8
    }

    pub fn schema_id(&self) -> Option<&str> {
        match self {
            PipelineResult::Succeeded(e) => Some(&e.schema_id),
            PipelineResult::Failed(f) => f.schema_id.as_deref(),
        }
    }

    pub fn success(&self) -> Option<&Extraction> {
        match self {
            PipelineResult::Succeeded(e) => Some(e),
            PipelineResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            PipelineResult::Succeeded(_) => None,
            PipelineResult::Failed(f) => Some(f),
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
