// ABOUTME: Tunnel upgrade route binding a client WebSocket to the server-side tunnel hub
// ABOUTME: Relays hub request frames out and client response frames back in until the socket closes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::endpoints;
use crate::resources::ServerResources;
use crate::tunnel::TunnelHub;

/// Tunnel routes implementation
pub struct TunnelRoutes;

impl TunnelRoutes {
    /// Create the tunnel upgrade route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::TUNNEL, get(Self::handle_upgrade))
            .with_state(resources)
    }

    async fn handle_upgrade(
        ws: WebSocketUpgrade,
        State(resources): State<Arc<ServerResources>>,
    ) -> impl IntoResponse {
        let hub = Arc::clone(&resources.tunnel_hub);
        ws.on_upgrade(move |socket: WebSocket| async move {
            relay(socket, hub).await;
        })
    }
}

async fn relay(socket: WebSocket, hub: Arc<TunnelHub>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outgoing = hub.attach(connection_id).await;
    info!(connection_id = %connection_id, "Tunnel client connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => hub.handle_incoming(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Tunnel socket error");
                break;
            }
        }
    }

    send_task.abort();
    hub.detach(connection_id).await;
    info!(connection_id = %connection_id, "Tunnel client disconnected");
}
