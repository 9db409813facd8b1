//! `bulwark`: simulate and validate resilience stacks from the command line.

mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use bulwark_core::{InvokeError, Invoker, QueryRequest};
use bulwark_runtime::{
    CacheStats, CircuitSnapshot, ErrorMetricsSnapshot, HealthStatus, ResilienceBuilder,
    ResilienceConfig,
};

use crate::script::{parse_script, ScriptedRemote};

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(about = "Retry, circuit breaking and caching for remote calls", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a scripted remote operation through the full stack
    Simulate {
        /// Config file (YAML or JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma-separated outcomes: ok, 500, 429:2, 503, reset, slow:250
        #[arg(short, long)]
        script: String,

        /// Number of calls to make
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: usize,

        /// Query sent with every call
        #[arg(short, long, default_value = "status")]
        query: String,

        /// Target sent with every call
        #[arg(short, long, default_value = "default")]
        target: String,

        /// Send all calls as one batch instead of one after another
        #[arg(long)]
        batch: bool,
    },

    /// Validate a config file and print the effective configuration
    Validate {
        /// Config file (YAML or JSON)
        file: PathBuf,
    },

    /// Print the default configuration as YAML
    Defaults,
}

#[derive(Serialize)]
struct CallReport {
    call: usize,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<String>,
}

impl CallReport {
    fn new(call: usize, result: Result<String, InvokeError>) -> Self {
        match result {
            Ok(response) => Self {
                call,
                ok: true,
                response: Some(response),
                error: None,
                class: None,
            },
            Err(err) => Self {
                call,
                ok: false,
                response: None,
                class: Some(err.metric_label()),
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct SimulationReport {
    calls: Vec<CallReport>,
    remote_invocations: u32,
    health: HealthStatus,
    metrics: ErrorMetricsSnapshot,
    circuit: CircuitSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<CacheStats>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Simulate {
            config,
            script,
            requests,
            query,
            target,
            batch,
        } => {
            let config = load_config(config.as_ref())?;
            let steps = parse_script(&script).context("Failed to parse script")?;
            simulate(config, steps, requests, QueryRequest::new(target, query), batch).await?;
        }
        Commands::Validate { file } => {
            let config = ResilienceConfig::from_file(&file)
                .with_context(|| format!("Invalid config: {}", file.display()))?;
            tracing::info!(path = %file.display(), "Config is valid");
            print!("{}", config.to_yaml()?);
        }
        Commands::Defaults => {
            print!("{}", ResilienceConfig::default().to_yaml()?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "bulwark=debug" } else { "bulwark=info" };

    // Logs go to stderr so stdout stays parseable JSON/YAML
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ResilienceConfig> {
    match path {
        Some(path) => ResilienceConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(ResilienceConfig::default()),
    }
}

async fn simulate(
    config: ResilienceConfig,
    steps: Vec<script::Step>,
    requests: usize,
    request: QueryRequest,
    batch: bool,
) -> Result<()> {
    let remote = Arc::new(ScriptedRemote::new(steps));
    let client = ResilienceBuilder::new()
        .config(config)
        .observer(Arc::new(
            |error: &InvokeError, metrics: &ErrorMetricsSnapshot| -> anyhow::Result<()> {
                tracing::info!(
                    class = %error.metric_label(),
                    error_rate = metrics.error_rate,
                    "Call failed"
                );
                Ok(())
            },
        ))
        .build(remote.clone());

    let calls = if batch {
        let batch_requests = vec![request; requests];
        client
            .invoke_batch(&batch_requests)
            .await
            .into_results()
            .into_iter()
            .enumerate()
            .map(|(i, result)| CallReport::new(i + 1, result))
            .collect()
    } else {
        let mut calls = Vec::with_capacity(requests);
        for i in 0..requests {
            calls.push(CallReport::new(i + 1, client.invoke(&request).await));
        }
        calls
    };

    let report = SimulationReport {
        calls,
        remote_invocations: remote.calls(),
        health: client.health(),
        metrics: client.metrics(),
        circuit: client.circuit(),
        cache: client.cache_stats(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
