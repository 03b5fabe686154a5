//! # schema-extract
//!
//! Schema-driven extraction of structured fields from OCR'd document text.
//!
//! A run classifies the text against a [`SchemaRegistry`], asks an LLM to
//! fill in the chosen schema's fields, parses the reply as JSON and
//! validates it strictly. Any failure of the first extraction attempt gets
//! exactly one retry with a prompt aimed at what went wrong. The outcome is
//! always a [`PipelineResult`]: either a validated value or a report of the
//! stage that failed.
//!
//! ## Core Concepts
//!
//! - **[`SchemaRegistry`]**: immutable map of [`SchemaDefinition`]s, loaded
//!   once from a directory of JSON Schema files.
//! - **[`Classifier`]**: picks the schema for a document
//!   ([`LlmClassifier`], [`KeywordClassifier`]).
//! - **[`ExtractionClient`]**: one prompt in, raw text out, over a
//!   pluggable [`Backend`](backend::Backend).
//! - **[`Extractor`]**: the state machine tying it together.
//! - **[`DocumentService`]**: intake wrapper that runs OCR and persistence
//!   around the extractor.
//!
//! ## Quick Start
//!
//! ```no_run
//! use schema_extract::{ExtractionClient, Extractor, SchemaRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(SchemaRegistry::load("schemas")?);
//!     let client = Arc::new(
//!         ExtractionClient::builder("http://localhost:11434")
//!             .model("llama3.2:3b")
//!             .build()?,
//!     );
//!     let extractor = Extractor::builder(registry, client).build()?;
//!
//!     let result = extractor.run("Form W-2 Wage and Tax Statement ...").await;
//!     match result.success() {
//!         Some(extraction) => println!("{}", extraction.data.to_value()),
//!         None => eprintln!("{}", result.failure().map(|f| f.summary.as_str()).unwrap_or("")),
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod output_parser;
pub mod persistence;
pub mod prompt;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod service;
pub mod tokens;
pub mod types;
pub mod validator;

pub use backend::{MockBackend, MockReply, OllamaBackend};
#[cfg(feature = "openai")]
pub use backend::OpenAiBackend;
pub use classifier::{Classification, Classifier, KeywordClassifier, LlmClassifier};
pub use client::{ExtractionClient, LlmConfig};
pub use config::ExtractorConfig;
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, RunReport};
pub use orchestrator::{Extractor, ExtractorBuilder};
pub use output_parser::ResponseParser;
pub use persistence::{InMemoryStore, InputMetadata, Persistence};
pub use prompt::{Attempt, PromptBuilder, RetryContext};
pub use registry::SchemaRegistry;
pub use retry::RetryPolicy;
pub use schema::{FieldSpec, FieldType, SchemaDefinition, SchemaError};
pub use service::{DocumentService, ProcessedDocument, TextExtractor, Utf8TextExtractor};
pub use tokens::{TokenCounter, TokenEncoding, TokenUsage};
pub use types::{
    AttemptOutcome, Extraction, ExtractionAttempt, FailureReport, FailureStage, PipelineResult,
};
pub use validator::{validate, ValidatedValue, ValidationError, ValidationRule};
