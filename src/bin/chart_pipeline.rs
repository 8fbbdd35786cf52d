//! A4: the CLI entrypoint (§6 "Operator surface").
//!
//! Grounded on the teacher's old `main.rs` for the `tracing_subscriber` setup and
//! `Arc`-wrapped service construction, and on `debug_bins/debug_ohlcv.rs` for the
//! `clap::Parser`/`Subcommand` shape (the teacher itself has no CLI surface — it's an
//! MCP server — so the subcommand pattern is imported from the pack's other repo).

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chart_pipeline_core::cache::{self, TieredCache};
use chart_pipeline_core::config::Config;
use chart_pipeline_core::data::yahoo::YahooQuoteProvider;
use chart_pipeline_core::model::{Interval, RequestSpec};
use chart_pipeline_core::orchestrator::Orchestrator;
use chart_pipeline_core::report_index::ReportIndex;
use chart_pipeline_core::stages::analyze::CannedAnalysisProvider;
use chart_pipeline_core::stages::chart::NullChartRenderer;
use chart_pipeline_core::stages::compose::NullReportComposer;
use chart_pipeline_core::telemetry::TelemetrySink;

#[derive(Parser)]
#[command(name = "chart-pipeline")]
#[command(about = "Cached financial chart analysis pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one ticker and produce a report.
    GenerateReport {
        #[arg(long)]
        ticker: String,
        #[arg(long, default_value = "1d")]
        interval: String,
        #[arg(long, default_value_t = 180)]
        num_candles: u32,
        #[arg(long)]
        exchange: Option<String>,
    },
    /// Print cache tier utilization, TTLs, and hit rates.
    Stats,
    /// Sweep expired cache entries, printing the count removed.
    ClearExpired,
    /// Clear every cache entry (development convenience).
    ClearAll,
    /// Print the per-operation latency/hit-rate rollup.
    PerformanceReport {
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Reset the in-memory telemetry counters.
    ResetPerformance,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env_or_default()?;
    let cache = Arc::new(TieredCache::new(config.cache.clone()));
    cache::spawn_sweeper(Arc::clone(&cache));

    match cli.command {
        Commands::GenerateReport {
            ticker,
            interval,
            num_candles,
            exchange,
        } => {
            let interval: Interval = interval
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{e}"))?;
            let spec = RequestSpec::new(ticker, interval, num_candles, exchange)
                .map_err(|e| anyhow::anyhow!("invalid request: {e}"))?;

            let telemetry = Arc::new(TelemetrySink::new());
            let report_index_path = config.output_dir.join("reports.sqlite");
            if let Some(parent) = report_index_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let report_index = Arc::new(ReportIndex::open(&report_index_path)?);

            let orchestrator = Orchestrator::new(
                config,
                cache,
                telemetry,
                Arc::new(YahooQuoteProvider),
                Arc::new(NullChartRenderer),
                Arc::new(CannedAnalysisProvider(
                    "No analysis provider is configured for this deployment.".into(),
                )),
                Arc::new(NullReportComposer),
                report_index,
            );

            let (path, message) = orchestrator.generate_report(spec).await?;
            println!("{message}");
            println!("report path: {}", path.display());
        }
        Commands::Stats => {
            let stats = cache.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::ClearExpired => {
            println!("cleared {} expired entries", cache.clear_expired());
        }
        Commands::ClearAll => {
            println!("cleared {} entries", cache.clear_all());
        }
        Commands::PerformanceReport { format } => {
            // Telemetry is process-scoped; a fresh CLI invocation always starts empty.
            // `performance_report`/`export_json` are exercised here for the reporting
            // surface; an embedding host would share one long-lived `TelemetrySink`.
            let telemetry = TelemetrySink::new();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&telemetry.export_json())?);
            } else {
                println!("{}", telemetry.performance_report());
            }
        }
        Commands::ResetPerformance => {
            let telemetry = TelemetrySink::new();
            telemetry.reset();
            println!("performance counters reset");
        }
    }

    Ok(())
}
