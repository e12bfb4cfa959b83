//! Backend pipeline gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http::server ──▶ routing (endpoint lookup)
//!                                   │
//!                                   ▼  one handler per backend, concurrently
//!                 tracing ▶ metrics ▶ circuit breaker ▶ ratelimit ▶ cel ▶ amqp
//!                                   │
//!                                   ▼
//!                 base: executor (oauth2 | cached) ▶ transform ▶ materializer
//!                                   │
//!                                   ▼
//!   Client ◀── http::response (merge) ◀──────────────────────────── Backend
//! ```
//!
//! Configuration reloads rebuild every pipeline and swap the endpoint table
//! atomically.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_pipeline::amqp::InMemoryBroker;
use gateway_pipeline::client::HttpTransport;
use gateway_pipeline::config::loader::load_config;
use gateway_pipeline::config::watcher::ConfigWatcher;
use gateway_pipeline::observability::{init_logging, init_metrics, MetricsCollector};
use gateway_pipeline::proxy::Context;
use gateway_pipeline::{GatewayServer, PipelineComposer};

#[derive(Parser)]
#[command(name = "gateway-pipeline")]
#[command(about = "API gateway composing a middleware pipeline per backend", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Reload the configuration when the file changes
    #[arg(short, long)]
    watch: bool,

    /// Validate the configuration, print each backend's layers and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway-pipeline starting");

    let root = Context::new();
    let metrics = MetricsCollector::new(&config.observability);
    let composer = PipelineComposer::new(root.clone(), metrics, Arc::new(InMemoryBroker::new()))
        .with_transport(Arc::new(HttpTransport::from_config(&config.timeouts)));

    if cli.check {
        for endpoint in &config.endpoints {
            for remote in &endpoint.backends {
                println!(
                    "{} {} -> {}: {}",
                    endpoint.method,
                    endpoint.endpoint,
                    remote.name,
                    composer.layer_plan(remote).join(" > ")
                );
            }
        }
        return Ok(());
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_address)?;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        endpoints = config.endpoints.len(),
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config, composer.build(), root.clone(), metrics);

    // The notify handle stops watching when dropped.
    let _watcher = if cli.watch {
        let (watcher, updates) = ConfigWatcher::new(&cli.config);
        server.spawn_reloader(updates);
        Some(watcher.run()?)
    } else {
        None
    };

    let shutdown = root.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
