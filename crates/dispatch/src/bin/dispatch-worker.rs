//! dispatch-worker: runs the notification delivery queues.
//!
//! Consumes every routed queue, delivers notifications over the configured
//! channels and serves the socket endpoint plus a small HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Settings from .env / environment
//! dispatch-worker
//!
//! # Overrides
//! dispatch-worker --port 8040 --concurrency 8 --routing-file routes.toml
//!
//! # Force the in-memory store even when PostgreSQL is configured
//! dispatch-worker --memory
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use adcrm_core::Config;
use adcrm_dispatch::{assemble, build_router, open_store, size_pg_pool, Worker};
use adcrm_queue::RoutingTable;

/// Notification dispatch worker.
#[derive(Parser, Debug)]
#[command(name = "dispatch-worker", version, about)]
struct Cli {
    /// Host to bind the HTTP server to.
    #[arg(long, env = "DISPATCH_HOST")]
    host: Option<String>,

    /// HTTP port.
    #[arg(long, env = "DISPATCH_PORT")]
    port: Option<u16>,

    /// Concurrent task executions per queue.
    #[arg(long)]
    concurrency: Option<usize>,

    /// TOML file replacing the built-in routing table.
    #[arg(long)]
    routing_file: Option<PathBuf>,

    /// Only consume these queues (comma separated). Defaults to all routed queues.
    #[arg(long, value_delimiter = ',')]
    queues: Vec<String>,

    /// Use the in-memory store even when PostgreSQL is configured.
    #[arg(long)]
    memory: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(concurrency) = self.concurrency {
            config.dispatch.concurrency = concurrency;
        }
        if let Some(ref path) = self.routing_file {
            config.dispatch.routing_file = Some(path.clone());
        }
    }
}

fn load_config(cli: &Cli) -> Config {
    adcrm_core::config::load_dotenv();
    let mut config = Config::from_env();
    cli.apply(&mut config);
    config
}

fn load_routing(config: &Config) -> anyhow::Result<RoutingTable> {
    match config.dispatch.routing_file {
        Some(ref path) => {
            let table = RoutingTable::from_file(path)
                .with_context(|| format!("loading routing table {}", path.display()))?;
            info!(path = %path.display(), rules = table.routes.len(), "routing table loaded");
            Ok(table)
        }
        None => Ok(RoutingTable::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli);
    let routing = load_routing(&config)?;
    let consumed = if cli.queues.is_empty() {
        routing.queues().len()
    } else {
        cli.queues.len()
    };
    size_pg_pool(&mut config, consumed);
    config.log_summary();

    let (store, directory) = open_store(&config, cli.memory)
        .await
        .context("opening notification store")?;
    let Worker {
        state,
        pool,
        backend,
    } = assemble(&config, store, directory, routing, &cli.queues)
        .context("building channel senders")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_handle = tokio::spawn(pool.run(shutdown_rx));
    let app = build_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "dispatch-worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    pool_handle.await.context("worker pool task")?;
    backend.close().await;

    info!("dispatch-worker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
