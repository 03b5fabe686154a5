//! Document intake: text extraction, storage, and the pipeline run.
//!
//! [`DocumentService::process`] turns an uploaded file into text through a
//! [`TextExtractor`], stores the input, runs the [`Extractor`], and stores
//! the result. Only collaborator failures are returned as `Err`; pipeline
//! failures are ordinary [`PipelineResult::Failed`] values.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::orchestrator::Extractor;
use crate::persistence::{InputMetadata, Persistence};
use crate::types::PipelineResult;

/// OCR or any other bytes-to-text step.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8], name: &str) -> anyhow::Result<String>;
}

/// For uploads that are already text. Rejects invalid UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8TextExtractor;

#[async_trait]
impl TextExtractor for Utf8TextExtractor {
    async fn extract_text(&self, bytes: &[u8], name: &str) -> anyhow::Result<String> {
        let text = std::str::from_utf8(bytes).with_context(|| format!("{} is not UTF-8 text", name))?;
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// What [`DocumentService::process`] hands back.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub run_id: Uuid,
    pub result: PipelineResult,
}

pub struct DocumentService {
    ocr: Arc<dyn TextExtractor>,
    store: Arc<dyn Persistence>,
    extractor: Arc<Extractor>,
}

impl DocumentService {
    pub fn new(ocr: Arc<dyn TextExtractor>, store: Arc<dyn Persistence>, extractor: Arc<Extractor>) -> Self {
        Self { ocr, store, extractor }
    }

    /// Classify and extract one uploaded document.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Collaborator`](crate::error::PipelineError::Collaborator)
    /// if text extraction or storage fails.
    /// When storing the input fails, the pipeline does not run.
    pub async fn process(&self, bytes: &[u8], name: &str) -> Result<ProcessedDocument> {
        self.process_inner(bytes, name, None).await
    }

    /// Like [`process`](Self::process), with the schema chosen by the caller.
    pub async fn process_with_schema(
        &self,
        bytes: &[u8],
        name: &str,
        schema_id: &str,
    ) -> Result<ProcessedDocument> {
        self.process_inner(bytes, name, Some(schema_id)).await
    }

    async fn process_inner(
        &self,
        bytes: &[u8],
        name: &str,
        schema_id: Option<&str>,
    ) -> Result<ProcessedDocument> {
        let run_id = Uuid::new_v4();
        let meta = InputMetadata {
            filename: name.to_string(),
            received_at: Utc::now(),
            bytes: bytes.len(),
        };

        let text = self
            .ocr
            .extract_text(bytes, name)
            .await
            .context("text extraction failed")?;

        self.store
            .store_input(run_id, &text, &meta)
            .await
            .context("storing input failed")?;

        let result = self.extractor.run_identified(run_id, &text, schema_id).await;

        self.store
            .store_result(run_id, &result)
            .await
            .context("storing result failed")?;

        tracing::info!(%run_id, file = name, succeeded = result.is_success(), "document processed");
        Ok(ProcessedDocument { run_id, result })
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}
