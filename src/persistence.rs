//! Storage collaborator for inputs and results.
//!
//! The pipeline never decides a storage format. It hands the input text
//! to [`Persistence::store_input`] before extraction and the final
//! [`PipelineResult`] to [`Persistence::store_result`] after it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::PipelineResult;

/// Facts about an uploaded document, stored alongside its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputMetadata {
    pub filename: String,
    pub received_at: DateTime<Utc>,
    /// Size of the upload before text extraction.
    pub bytes: usize,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn store_input(&self, run_id: Uuid, text: &str, meta: &InputMetadata) -> anyhow::Result<()>;

    async fn store_result(&self, run_id: Uuid, result: &PipelineResult) -> anyhow::Result<()>;
}

/// A stored input.
#[derive(Debug, Clone)]
pub struct StoredInput {
    pub text: String,
    pub meta: InputMetadata,
}

/// Keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inputs: Mutex<HashMap<Uuid, StoredInput>>,
    results: Mutex<HashMap<Uuid, PipelineResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self, run_id: &Uuid) -> Option<StoredInput> {
        self.inputs.lock().ok()?.get(run_id).cloned()
    }

    pub fn result(&self, run_id: &Uuid) -> Option<PipelineResult> {
        self.results.lock().ok()?.get(run_id).cloned()
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn store_input(&self, run_id: Uuid, text: &str, meta: &InputMetadata) -> anyhow::Result<()> {
        let mut inputs = self
            .inputs
            .lock()
            .map_err(|_| anyhow::anyhow!("input store lock poisoned"))?;
        if inputs.contains_key(&run_id) {
            anyhow::bail!("input for run {} already stored", run_id);
        }
        inputs.insert(
            run_id,
            StoredInput {
                text: text.to_string(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }

    async fn store_result(&self, run_id: Uuid, result: &PipelineResult) -> anyhow::Result<()> {
        let mut results = self
            .results
            .lock()
            .map_err(|_| anyhow::anyhow!("result store lock poisoned"))?;
        results.insert(run_id, result.clone());
        Ok(())
    }
}
