// ABOUTME: Tunnel client binary run on the machine that can reach the local model server
// ABOUTME: Connects to the server's tunnel endpoint and executes relayed HTTP requests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::time::Duration;

use anyhow::Result;
use chatloom::{
    constants::tunnel::RECONNECT_DELAY_MS,
    logging::{self, LoggingConfig},
    tunnel::{client::run_tunnel_client, TunnelClientConfig},
};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "chatloom-tunnel")]
#[command(about = "Relay Chatloom server requests to a local model server")]
pub struct Args {
    /// Server tunnel endpoint
    #[arg(long, env = "CHATLOOM_TUNNEL_URL", default_value = "ws://localhost:8080/api/tunnel")]
    server_url: String,

    /// Only fetch URLs starting with this prefix
    #[arg(long, env = "TUNNEL_ALLOWED_PREFIX")]
    allowed_prefix: Option<String>,

    /// Delay before reconnecting, in milliseconds
    #[arg(long, env = "TUNNEL_RECONNECT_DELAY_MS", default_value_t = RECONNECT_DELAY_MS)]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    LoggingConfig::from_env()
        .with_service_name(format!("{}-tunnel", logging::DEFAULT_SERVICE_NAME))
        .init()?;

    let mut config = TunnelClientConfig::new(args.server_url);
    config.allowed_prefix = args.allowed_prefix.filter(|p| !p.is_empty());
    config.reconnect_delay = Duration::from_millis(args.reconnect_delay_ms);

    info!(
        server = %config.server_url,
        allowed_prefix = ?config.allowed_prefix,
        "Starting tunnel client"
    );

    run_tunnel_client(config).await?;
    Ok(())
}
