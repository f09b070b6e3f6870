//! Assess one paper against one codebook.
//!
//! To run:
//! - Set `OPENROUTER_API_KEY`
//! - `cargo run --example single_pair -- paper.pdf codebook.txt`
//!
//! Verdicts land in `single_pair.json`; raw responses in `llm_responses/`.

use std::path::PathBuf;
use std::sync::Arc;

use codebook_assess::assess::{Orchestrator, RunOptions};
use codebook_assess::config::{PanelConfig, PanelOverrides};
use codebook_assess::corpus::{discover_documents, discover_metrics};
use codebook_assess::gateway::NoopUsageSink;
use codebook_assess::{EvaluationPanel, FsResponseCache, ProviderGateway, VerdictStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(paper), Some(codebook)) = (args.next(), args.next()) else {
        return Err("usage: single_pair <paper.pdf> <codebook.txt>".into());
    };

    let documents = discover_documents(&PathBuf::from(paper))?;
    let metrics = discover_metrics(&PathBuf::from(codebook))?;

    // Defaults, then ASSESS_* env overrides.
    let config = PanelConfig::resolve(None, PanelOverrides::default())?;
    let gateway = ProviderGateway::from_env(Arc::new(NoopUsageSink))?;
    let options = RunOptions::default();
    let panel = EvaluationPanel::from_config(Arc::new(gateway), &config, options.run_id);

    let cache = FsResponseCache::new(FsResponseCache::default_dir())?;
    let store = VerdictStore::load("single_pair.json")?;

    let mut orchestrator = Orchestrator::new(panel, Arc::new(cache), store, options);
    let summary = orchestrator.run(&documents, &metrics).await?;
    println!("{summary}");

    for document in &documents {
        for metric in &metrics {
            if let Some(record) = orchestrator.store().record(&document.id, &metric.name) {
                println!("{}", serde_json::to_string_pretty(record)?);
            }
        }
    }
    Ok(())
}
