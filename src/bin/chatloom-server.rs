// ABOUTME: Chatloom server binary serving the HTTP API, event subscriptions, and tunnel endpoint
// ABOUTME: Loads configuration from the environment with CLI overrides and runs until Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Chatloom Server Binary
//!
//! Opens the database, registers the configured providers, starts the bus
//! heartbeat, and serves the router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chatloom::{
    config::{DatabaseUrl, ServerConfig},
    constants::endpoints,
    logging,
    resources::ServerResources,
    routes,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "chatloom-server")]
#[command(about = "Chatloom - branching chat server")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL (e.g. `sqlite:./data/chatloom.db`)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(url) = args.database_url.as_deref() {
        config.database.url = DatabaseUrl::parse_url(url)?;
    }

    logging::init_from_env()?;
    info!("{}", config.summary());

    let http_port = config.http_port;
    let heartbeat_interval = config.bus.heartbeat_interval;
    let resources = Arc::new(ServerResources::new(config).await?);
    let heartbeat = resources.bus.start_heartbeat(heartbeat_interval);

    let app = routes::router(Arc::clone(&resources));
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{addr}");
    info!("  Events (SSE):  GET {}", endpoints::EVENTS);
    info!("  Events (WS):   GET {}", endpoints::SOCKET);
    info!("  Tunnel:        GET {}", endpoints::TUNNEL);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    heartbeat.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
