//! # rf-runner
//!
//! Main entry point for the rsi-feed pipeline.
//!
//! `run` wires the in-process broker, the fan-out gateway and the CSV producer
//! together and serves viewers until Ctrl+C. `watch` is a minimal terminal
//! viewer for a running gateway.
//!
//! # Usage
//!
//! ```bash
//! rf-runner run config.json --source trades_data.csv --log-level info
//! rf-runner watch ws://127.0.0.1:8080 BTC
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rf_core::Update;
use rf_core::broker::{Broker, MemoryBroker};
use rf_core::ws::{ViewerClient, ViewerClientConfig};
use rf_gateway::GatewayService;
use rf_ingest::{IngestProducer, RecordSource};
use tracing::{error, info, warn};

/// Token trade feed: CSV ingestion, fan-out gateway, terminal viewer.
#[derive(Parser)]
#[command(name = "rf-runner", about = "Token trade feed runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker and gateway, ingest the source once, then serve viewers.
    Run {
        /// Configuration file path (JSON).
        config: PathBuf,

        /// CSV source; overrides `producer.source_path`.
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Print every Update the gateway sends for `token`.
    Watch {
        /// Gateway URL, e.g. `ws://127.0.0.1:8080`.
        url: String,
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, source } => run(config, source, &cli.log_level, cli.log_dir.as_deref()).await,
        Command::Watch { url, token } => {
            rf_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "rf-watch");
            watch(url, token).await
        }
    }
}

async fn run(config_path: PathBuf, source: Option<PathBuf>, log_level: &str, log_dir: Option<&str>) -> Result<()> {
    // 1. Load configuration
    let config = rf_core::config::load_config(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    // 2. Initialize logging
    let log_dir = log_dir.map(str::to_string).or_else(|| config.log_path());
    rf_core::logging::init_logging(log_level, log_dir.as_deref(), &config.module_name());
    info!("rf-runner starting — config={}, log_level={log_level}", config_path.display());

    let producer_cfg = config.producer();
    let source_path = source.or_else(|| producer_cfg.source_path.clone().map(PathBuf::from));

    // 3. Broker
    let bus = MemoryBroker::new();
    bus.connect().await.context("broker unreachable")?;
    info!("broker ready ({} configured address(es))", config.broker().brokers().len());

    // 4. Gateway (bind + subscribe before any record is produced)
    let mut gateway = GatewayService::start(Arc::new(bus.connection()), &config.gateway()).await?;
    info!("gateway listening on ws://{}", gateway.local_addr());

    // 5. Ingest the source once. Ingestion failures are logged; the gateway
    //    keeps serving whatever reached the topic.
    match source_path {
        Some(path) => {
            let producer =
                IngestProducer::new(Arc::new(bus.connection()), producer_cfg.topic(), producer_cfg.retry_policy());
            let ingested = match RecordSource::open(&path) {
                Ok(records) => producer.run(records).await,
                Err(e) => Err(e),
            };
            match ingested {
                Ok(summary) => info!("ingestion of {} complete — {summary}", path.display()),
                Err(e) => error!("ingestion of {} failed: {e}", path.display()),
            }
        }
        None => warn!("no source configured (--source or producer.source_path), skipping ingestion"),
    }

    // 6. Serve viewers until Ctrl+C
    info!("serving viewers — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    gateway.stop().await;
    let _ = bus.close().await;
    info!("stopped — goodbye");
    Ok(())
}

async fn watch(url: String, token: String) -> Result<()> {
    let mut client = ViewerClient::new(ViewerClientConfig::new(url, Some(token)))?;
    client.start(Arc::new(|update: Update| println!("{update}")));

    tokio::signal::ctrl_c().await?;
    client.stop().await;
    Ok(())
}
