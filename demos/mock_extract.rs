//! Example: a full run against MockBackend, retry included.
//!
//! The first reply carries a property the schema does not allow, so the
//! extractor retries once with a correction and the second reply validates.
//!
//! Run with: `RUST_LOG=schema_extract=debug cargo run --example mock_extract`

use schema_extract::events::RecordingHandler;
use schema_extract::{
    DocumentService, ExtractionClient, Extractor, InMemoryStore, KeywordClassifier, MockBackend,
    RetryPolicy, SchemaRegistry, Utf8TextExtractor,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const W2_TEXT: &str = "This W-2 Wage and Tax Statement for the year 2016 reports: \
    Wages, tips, other compensation: $10,415.00 Federal income tax withheld: $900.00 \
    Employer: Michigan State University Employee: Sparty Jones Control number: 00000001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schema_extract=info")),
        )
        .init();

    let registry = SchemaRegistry::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/schemas"))?;
    println!("Loaded schemas: {:?}", registry.ids().collect::<Vec<_>>());

    let mock = Arc::new(MockBackend::new(vec![
        r#"{"employer_name": "Michigan State University", "employee_name": "Sparty Jones",
            "wages": 10415.00, "federal_income_tax_withheld": 900.00, "tax_year": 2016}"#
            .into(),
        r#"```json
{"employer_name": "Michigan State University", "employee_name": "Sparty Jones",
 "wages": 10415.00, "federal_income_tax_withheld": 900.00, "control_number": "00000001"}
```"#
            .into(),
    ]));
    let client = ExtractionClient::builder("http://unused").backend(mock.clone()).build()?;

    let recorder = Arc::new(RecordingHandler::new());
    let extractor = Extractor::builder(Arc::new(registry), Arc::new(client))
        .classifier(Arc::new(KeywordClassifier::new()))
        .retry_policy(RetryPolicy::immediate())
        .event_handler(recorder.clone())
        .build()?;

    let store = Arc::new(InMemoryStore::new());
    let service = DocumentService::new(Arc::new(Utf8TextExtractor), store.clone(), Arc::new(extractor));
    let doc = service.process(W2_TEXT.as_bytes(), "w2-2016.txt").await?;

    println!("\nRun {}", doc.run_id);
    match doc.result.success() {
        Some(extraction) => {
            println!(
                "Extracted {} v{} in {} attempt(s):",
                extraction.schema_id,
                extraction.schema_version,
                extraction.attempts_used()
            );
            println!("{}", serde_json::to_string_pretty(&extraction.data)?);
        }
        None => {
            if let Some(failure) = doc.result.failure() {
                println!("Failed at {}: {}", failure.stage, failure.summary);
            }
        }
    }

    for report in recorder.reports() {
        println!("\nRun report:");
        for attempt in &report.attempts {
            println!(
                "  attempt {}: {} ({} prompt / {} response tokens)",
                attempt.number, attempt.outcome, attempt.prompt_tokens, attempt.response_tokens
            );
        }
        println!(
            "  total: {} prompt / {} response tokens",
            report.total_prompt_tokens(),
            report.total_response_tokens()
        );
    }
    println!("\nStored results: {}, backend calls: {}", store.result_count(), mock.calls());

    Ok(())
}
