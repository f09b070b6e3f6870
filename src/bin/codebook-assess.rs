#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use codebook_assess::assess::{ObserverError, Orchestrator, PairEvent, PairObserver, RunOptions};
use codebook_assess::cache::FsResponseCache;
use codebook_assess::config::{PanelConfig, PanelOverrides};
use codebook_assess::corpus::{discover_documents, discover_metrics};
use codebook_assess::evaluator::EvaluationPanel;
use codebook_assess::gateway::{ProviderGateway, TracingUsageSink};
use codebook_assess::report::summarize;
use codebook_assess::store::VerdictStore;

#[derive(Parser)]
#[command(
    name = "codebook-assess",
    version,
    about = "Dual-evaluator codebook assessment of research documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess every document against every metric
    Run {
        /// A .pdf file or a directory of them
        #[arg(short = 'p', long)]
        documents: PathBuf,
        /// A .txt codebook or a directory of them
        #[arg(short = 'm', long)]
        metrics: PathBuf,
        #[arg(short = 'o', long, default_value = "assessments.json")]
        output: PathBuf,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Re-assess pairs that already have a complete record
        #[arg(long = "override")]
        override_complete: bool,
        /// Ignore cached responses (fresh responses are still cached)
        #[arg(long)]
        no_cache: bool,
        /// JSON panel config (model ids, temperature)
        #[arg(long)]
        panel_config: Option<PathBuf>,
        #[arg(long)]
        evaluator_a: Option<String>,
        #[arg(long)]
        evaluator_b: Option<String>,
        #[arg(long)]
        arbiter: Option<String>,
    },
    /// Summarize agreement and final values in a verdict store
    Summary {
        #[arg(long, default_value = "assessments.json")]
        store: PathBuf,
        #[arg(long, value_enum, default_value_t = SummaryFormat::Text)]
        format: SummaryFormat,
    },
    /// Export the response cache index to JSONL
    CacheExport {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SummaryFormat {
    Text,
    Json,
}

/// Prints one line per pair to stdout.
struct StdoutObserver;

#[async_trait::async_trait]
impl PairObserver for StdoutObserver {
    async fn on_pair(&self, event: PairEvent) -> Result<(), ObserverError> {
        println!("{event}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            documents,
            metrics,
            output,
            cache_dir,
            override_complete,
            no_cache,
            panel_config,
            evaluator_a,
            evaluator_b,
            arbiter,
        } => {
            let config = PanelConfig::resolve(
                panel_config.as_deref(),
                PanelOverrides {
                    evaluator_a_model: evaluator_a,
                    evaluator_b_model: evaluator_b,
                    arbiter_model: arbiter,
                },
            )?;
            let documents = discover_documents(&documents)?;
            let metrics = discover_metrics(&metrics)?;

            let _lock = VerdictStore::empty(&output).lock()?;
            let store = VerdictStore::load(&output)?;
            let cache_dir = cache_dir.unwrap_or_else(FsResponseCache::default_dir);
            let cache = FsResponseCache::new(cache_dir)?;

            let run_id = Uuid::new_v4();
            let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
            let panel = EvaluationPanel::from_config(Arc::new(gateway), &config, run_id);
            let options = RunOptions {
                override_complete,
                no_cache,
                run_id,
            };

            let mut orchestrator = Orchestrator::new(panel, Arc::new(cache), store, options)
                .with_observer(Arc::new(StdoutObserver));
            let summary = orchestrator.run(&documents, &metrics).await?;
            println!("{summary}");
        }
        Commands::Summary { store, format } => {
            if !store.exists() {
                return Err(format!("store not found: {}", store.display()).into());
            }
            let summary = summarize(&VerdictStore::load(&store)?);
            match format {
                SummaryFormat::Text => print!("{}", summary.render_text()),
                SummaryFormat::Json => println!("{}", summary.to_json()?),
            }
        }
        Commands::CacheExport { cache_dir, out } => {
            let cache_dir = cache_dir.unwrap_or_else(FsResponseCache::default_dir);
            let cache = FsResponseCache::new(cache_dir)?;
            let rows = cache.export_jsonl(&out)?;
            println!("exported {rows} cache entries to {}", out.display());
        }
    }

    Ok(())
}
