// ABOUTME: Health check route for liveness probes
// ABOUTME: Reports status, version, and how many clients are attached to the bus and tunnel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::constants::endpoints;
use crate::resources::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::HEALTH_CHECK, get(Self::health))
            .with_state(resources)
    }

    async fn health(State(resources): State<Arc<ServerResources>>) -> Json<Value> {
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "subscribers": resources.bus.channel_count().await,
            "tunnelConnected": resources.tunnel_hub.is_connected().await,
            "ollamaTransport": resources.config.ollama.transport,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}
