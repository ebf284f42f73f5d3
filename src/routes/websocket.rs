// ABOUTME: WebSocket subscription route forwarding broadcast bus events to connected sockets
// ABOUTME: Incoming frames are ignored; the channel detaches when the socket closes
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
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::BroadcastBus;
use crate::constants::endpoints;
use crate::resources::ServerResources;

/// WebSocket routes implementation
pub struct WebSocketRoutes;

impl WebSocketRoutes {
    /// Create the WebSocket subscription route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::SOCKET, get(Self::handle_websocket))
            .with_state(resources)
    }

    /// Upgrade the connection and attach it to the bus
    async fn handle_websocket(
        ws: WebSocketUpgrade,
        State(resources): State<Arc<ServerResources>>,
    ) -> impl IntoResponse {
        info!("New WebSocket connection request");

        // Yield to scheduler to allow other tasks to progress during upgrade
        task::yield_now().await;

        let bus = Arc::clone(&resources.bus);
        ws.on_upgrade(move |socket: WebSocket| async move {
            handle_connection(socket, bus).await;
        })
    }
}

async fn handle_connection(socket: WebSocket, bus: Arc<BroadcastBus>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut frames = bus.attach_socket(connection_id).await;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    send_task.abort();
    bus.detach(connection_id).await;
    debug!(connection_id = %connection_id, "WebSocket subscriber disconnected");
}
