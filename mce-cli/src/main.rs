// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metrics computation CLI
//!
//! Computes trace metrics over exported span files.

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mce_core::{BatchConfig, TimeRange};
use mce_engine::config::LogFormat;
use mce_engine::{EngineConfig, JsonFileSource, MetricsConfigRequest, MetricsEngine};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "mce")]
#[command(about = "Metrics computation over multi-agent traces", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MCE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute metrics over a trace export
    Compute(ComputeArgs),

    /// List metrics that can be requested
    ListMetrics,
}

#[derive(Args)]
struct ComputeArgs {
    /// Span export: JSON array, {"data": [...]} or newline-delimited JSON
    #[arg(short, long)]
    traces: PathBuf,

    /// Request file with metrics, llm_judge_config and batch_config
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Metrics to compute, comma separated
    #[arg(short, long, value_delimiter = ',')]
    metrics: Vec<String>,

    /// Select the N most recent sessions
    #[arg(long, conflicts_with_all = ["start", "end", "app_name"])]
    num_sessions: Option<usize>,

    /// Start of the time range (RFC 3339)
    #[arg(long, requires = "end", conflicts_with = "app_name")]
    start: Option<String>,

    /// End of the time range (RFC 3339)
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Select sessions of one application
    #[arg(long)]
    app_name: Option<String>,

    /// Write results here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}', expected text or json", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.clone()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    logging::init(&config.logging);

    let engine = MetricsEngine::new(config);

    match cli.command {
        Commands::ListMetrics => {
            for name in engine.available_metrics() {
                println!("{}", name);
            }
        }
        Commands::Compute(args) => compute(&engine, args).await?,
    }

    Ok(())
}

async fn compute(engine: &MetricsEngine, args: ComputeArgs) -> Result<()> {
    let request = build_request(&args)?;
    info!(
        metrics = ?request.metrics,
        batch = %request.batch_config.describe(),
        traces = ?args.traces,
        "Computing metrics"
    );

    let source = JsonFileSource::new(&args.traces);
    let response = match engine.compute_metrics(request, &source).await {
        Ok(response) => response,
        Err(e) if e.is_client_error() => bail!("Invalid request: {}", e),
        Err(e) => return Err(e).context("Metrics computation failed"),
    };

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("Failed to write results to {:?}", path))?;
            info!(path = ?path, sessions = response.session_count, "Wrote metrics results");
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Request from `--request`, with command-line flags taking precedence
fn build_request(args: &ComputeArgs) -> Result<MetricsConfigRequest> {
    let mut request = match &args.request {
        Some(path) => read_request(path)?,
        None => MetricsConfigRequest::default(),
    };

    if !args.metrics.is_empty() {
        request.metrics = args
            .metrics
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
    }

    if let Some(batch) = batch_from_flags(args) {
        request.batch_config = batch;
    }

    if request.metrics.is_empty() {
        bail!("No metrics requested; pass --metrics or a request file");
    }
    Ok(request)
}

fn batch_from_flags(args: &ComputeArgs) -> Option<BatchConfig> {
    if let Some(n) = args.num_sessions {
        return Some(BatchConfig::most_recent(n));
    }
    if let (Some(start), Some(end)) = (&args.start, &args.end) {
        return Some(BatchConfig {
            time_range: Some(TimeRange {
                start: start.clone(),
                end: end.clone(),
            }),
            ..BatchConfig::default()
        });
    }
    args.app_name.as_ref().map(BatchConfig::app)
}

fn read_request(path: &Path) -> Result<MetricsConfigRequest> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read request file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse request file {:?}", path))
}
