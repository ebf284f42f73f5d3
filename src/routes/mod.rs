// ABOUTME: Route module organization for Chatloom HTTP endpoints
// ABOUTME: Assembles the domain routers into one axum app with tracing and CORS layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! Route module for Chatloom
//!
//! Each domain module holds route definitions and thin handlers that delegate
//! to the generation pipeline, the database, the bus, or the tunnel hub.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::setup_cors;
use crate::resources::ServerResources;

/// Chat CRUD, message listing, sending, and transcripts
pub mod chats;
/// Server-Sent Events subscription
pub mod events;
/// Liveness endpoint
pub mod health;
/// Message regeneration, duplication, editing, and deletion
pub mod messages;
/// Provider and model listing
pub mod providers;
/// Tunnel client upgrade endpoint
pub mod tunnel;
/// WebSocket subscription
pub mod websocket;

pub use chats::ChatRoutes;
pub use events::EventRoutes;
pub use health::HealthRoutes;
pub use messages::MessageRoutes;
pub use providers::ProviderRoutes;
pub use tunnel::TunnelRoutes;
pub use websocket::WebSocketRoutes;

/// Build the complete application router
pub fn router(resources: Arc<ServerResources>) -> Router {
    let cors = setup_cors(&resources.config.cors_allowed_origins);

    Router::new()
        .merge(HealthRoutes::routes(Arc::clone(&resources)))
        .merge(ProviderRoutes::routes(Arc::clone(&resources)))
        .merge(ChatRoutes::routes(Arc::clone(&resources)))
        .merge(MessageRoutes::routes(Arc::clone(&resources)))
        .merge(EventRoutes::routes(Arc::clone(&resources)))
        .merge(WebSocketRoutes::routes(Arc::clone(&resources)))
        .merge(TunnelRoutes::routes(resources))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
