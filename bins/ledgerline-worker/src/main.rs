//! Ledgerline worker binary.
//!
//! Connects to the chain node (HTTP with request hedging, plus a pool of
//! heartbeat-monitored WebSockets) and to the indexer database, then keeps
//! local blocks consistent with the canonical chain until stopped. Chain
//! reads made by the reorg reconciler are retried until they succeed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ledgerline_core::traits::{ChainSource, ConnectionStatus};
use ledgerline_db::Database;
use ledgerline_rpc::{HedgedClient, HttpTransport, RetryingChain, SocketPool};
use ledgerline_worker_lib::{BlocksRevertService, CounterService, RevertWatcher, WorkerConfig};
use tracing::{info, warn};

/// Ledgerline indexing worker: connectivity and reorg consistency.
#[derive(Parser, Debug)]
#[command(name = "ledgerline-worker", version, about = "Ledgerline indexing worker")]
struct Args {
    /// Optional TOML config file (values there override defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP JSON-RPC endpoint of the chain node
    #[arg(long)]
    rpc_url: Option<String>,

    /// WebSocket endpoint of the chain node
    #[arg(long)]
    ws_url: Option<String>,

    /// Database URL (sqlite:// or postgres://)
    #[arg(long)]
    database_url: Option<String>,

    /// Number of WebSocket connections kept open
    #[arg(long)]
    ws_pool_size: Option<usize>,

    /// Do not watch for chain reorganizations
    #[arg(long)]
    disable_blocks_revert: bool,

    /// Do not run counter workers
    #[arg(long)]
    disable_counters_processing: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    /// Apply CLI overrides on top of the loaded configuration.
    fn apply(self, mut config: WorkerConfig) -> (WorkerConfig, String) {
        if let Some(url) = self.rpc_url {
            config.rpc_url = url;
        }
        if let Some(url) = self.ws_url {
            config.ws_url = url;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(size) = self.ws_pool_size {
            config.ws_pool_size = size;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.disable_blocks_revert |= self.disable_blocks_revert;
        config.disable_counters_processing |= self.disable_counters_processing;
        (config, self.log_format)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = WorkerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let (config, log_format) = args.apply(loaded);
    config.validate().context("invalid configuration")?;

    init_logging(&config.log_level, &log_format);

    info!("Ledgerline worker v{}", env!("CARGO_PKG_VERSION"));
    info!(rpc_url = %config.rpc_url, ws_url = %config.ws_url, "chain endpoints");

    let db = Database::connect(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;
    let uow = db.unit_of_work();
    info!(backend = %db.backend(), "database connected");

    let http = HttpTransport::new(&config.rpc_url, config.rpc_request_timeout())
        .context("failed to build RPC client")?;
    let rpc = HedgedClient::new(http, config.hedge());
    match rpc.latest_block_number().await {
        Ok(head) => info!(head, "connected to chain node"),
        Err(e) => warn!(error = %e, "chain node not reachable yet"),
    }

    let pool = Arc::new(SocketPool::connect(&config.ws_url, config.pool(), config.heartbeat()));
    let mut tasks = vec![pool.spawn_reconciler()];
    info!(size = pool.size(), state = %pool.state(), "socket pool started");

    let counters = CounterService::with_default_processors(uow.clone(), config.counters_batch_size());
    if config.disable_counters_processing {
        info!("counters processing disabled");
    } else {
        tasks.extend(counters.spawn_workers(config.counters_update_interval()));
    }

    if config.disable_blocks_revert {
        info!("blocks revert disabled");
    } else {
        let chain = RetryingChain::new(rpc.clone(), config.retry());
        let service = Arc::new(BlocksRevertService::new(chain, uow.clone(), counters.clone()));
        tasks.push(RevertWatcher::new(service, config.revert_watch_interval()).spawn());
    }

    info!("Ledgerline worker running (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await.context("failed to install Ctrl+C handler")?;
    info!("received Ctrl+C, shutting down...");

    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        task.await.ok();
    }
    pool.close();
    db.close().await;
    info!("Ledgerline worker shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured JSON output; any other value gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
