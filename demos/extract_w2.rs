//! Example: extract a W-2 with a live model.
//!
//! Reads configuration from `extract.toml` (if present) and the
//! `SCHEMA_EXTRACT_*` environment variables. Defaults target a local
//! Ollama at `http://localhost:11434`.
//!
//! Run with: `cargo run --example extract_w2 -- [path/to/document.txt]`

use schema_extract::{Extractor, ExtractorConfig, PipelineResult};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const SAMPLE: &str = "This W-2 Wage and Tax Statement for the year 2016 reports the following information: \
    Wages, tips, other compensation: $10,415.00 Federal Income tax withheld: $900.00 \
    Social security wages: $12,990.00 Social security tax withheld: $805.38 \
    Medicare wages and tips: $12,990.00 Medicare tax withheld: $188.36 Employee's SSA number: 123-45-6789 \
    Employer's FED ID number: 38-6005984 Control number: 00000001 Employer: Michigan State University, \
    426 Auditorium #350, East Lansing MI 48824 Retirement plan: Checked \
    Employee: Sparty Jones, 123 Spartan Blvd, East Lansing MI 48823 \
    State: MI State wages, tips, etc.: $10,415.00 State income tax: $442.00";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schema_extract=info")),
        )
        .init();

    let mut config = ExtractorConfig::load(Path::new("extract.toml")).await?;
    if !config.schema_dir.exists() {
        config.schema_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/schemas");
    }
    let extractor = Extractor::from_config(&config)?;

    let text = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => SAMPLE.to_string(),
    };

    println!("Extracting with {} via {}...", config.model, extractor.client().backend_name());
    match extractor.run(&text).await {
        PipelineResult::Succeeded(extraction) => {
            println!(
                "{} v{} ({} attempt(s))",
                extraction.schema_id,
                extraction.schema_version,
                extraction.attempts_used()
            );
            println!("{}", serde_json::to_string_pretty(&extraction.data)?);
        }
        PipelineResult::Failed(failure) => {
            eprintln!("Failed at {} stage: {}", failure.stage, failure.summary);
            for line in failure.attempt_summaries() {
                eprintln!("  {}", line);
            }
            std::process::exit(1);
        }
    }

    Ok(())
}
