//! murmur - gossip broadcast and grow-only counter node
//!
//! Speaks newline-delimited JSON on stdin/stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use murmur_node::{
    CounterStrategy, FanoutStrategy, NodeConfig, ReconcileStrategy, Runtime, Workload,
};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Gossip broadcast and grow-only counter node")]
#[command(version)]
struct Cli {
    /// Workload to serve
    #[arg(long, env = "MURMUR_WORKLOAD", value_enum)]
    workload: Option<Workload>,

    /// Path to a JSON config file
    #[arg(short, long, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Peers that receive new values
    #[arg(long, value_enum)]
    fanout: Option<FanoutStrategy>,

    /// Anti-entropy reconciliation strategy
    #[arg(long, value_enum)]
    reconcile: Option<ReconcileStrategy>,

    /// Anti-entropy interval in milliseconds
    #[arg(long)]
    anti_entropy_interval_ms: Option<u64>,

    /// Propagate only through anti-entropy
    #[arg(long)]
    no_immediate_fanout: bool,

    /// Counter convergence strategy
    #[arg(long, value_enum)]
    counter_strategy: Option<CounterStrategy>,

    /// Key-value service backing the counter
    #[arg(long)]
    kv_service: Option<String>,

    /// RPC timeout in milliseconds
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(workload) = self.workload {
            config.workload = workload;
        }
        if let Some(fanout) = self.fanout {
            config.gossip.fanout = fanout;
        }
        if let Some(reconcile) = self.reconcile {
            config.gossip.reconcile = reconcile;
        }
        if let Some(interval) = self.anti_entropy_interval_ms {
            config.gossip.anti_entropy_interval_ms = interval;
        }
        if self.no_immediate_fanout {
            config.gossip.immediate_fanout = false;
        }
        if let Some(strategy) = self.counter_strategy {
            config.counter.strategy = strategy;
        }
        if let Some(service) = self.kv_service {
            config.counter.kv_service = service;
        }
        if let Some(timeout) = self.rpc_timeout_ms {
            config.rpc_timeout_ms = timeout;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("murmur=info,murmur_node=info"))?;

    // stdout carries the protocol; logs must stay on stderr.
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.into_config()?;
    info!(
        workload = ?config.workload,
        fanout = ?config.gossip.fanout,
        reconcile = ?config.gossip.reconcile,
        counter = ?config.counter.strategy,
        "starting murmur"
    );

    let input = BufReader::new(tokio::io::stdin());
    Runtime::new(config)
        .run(input, tokio::io::stdout())
        .await
        .context("node runtime failed")?;

    info!("murmur stopped");
    Ok(())
}
