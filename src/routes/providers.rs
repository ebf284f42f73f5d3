// ABOUTME: Provider listing route reporting each registered provider, its status, and models
// ABOUTME: Disabled providers are listed without models; listing failures degrade to an empty list
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

use crate::errors::AppError;
use crate::llm::{LlmCapabilities, ModelInfo};
use crate::resources::ServerResources;

/// One provider as seen by clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    /// Provider id stored on chats
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether generations can start right now
    pub enabled: bool,
    /// Capability flags
    pub capabilities: LlmCapabilities,
    /// Offered models; empty while disabled
    pub models: Vec<ModelInfo>,
}

/// Response listing providers
#[derive(Debug, Serialize)]
pub struct ProviderListResponse {
    /// Registered providers in registration order
    pub providers: Vec<ProviderSummary>,
}

/// Provider routes implementation
pub struct ProviderRoutes;

impl ProviderRoutes {
    /// Create provider routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/providers", get(Self::list_providers))
            .with_state(resources)
    }

    async fn list_providers(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let mut providers = Vec::with_capacity(resources.providers.len());

        for provider in resources.providers.list() {
            let enabled = provider.is_enabled().await;
            let models = if enabled {
                provider.models().await.unwrap_or_else(|e| {
                    warn!(provider = provider.id(), error = %e, "Failed to list models");
                    Vec::new()
                })
            } else {
                Vec::new()
            };

            providers.push(ProviderSummary {
                id: provider.id().to_owned(),
                name: provider.display_name().to_owned(),
                enabled,
                capabilities: provider.capabilities(),
                models,
            });
        }

        Ok((StatusCode::OK, Json(ProviderListResponse { providers })).into_response())
    }
}
