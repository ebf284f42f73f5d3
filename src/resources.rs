// ABOUTME: Shared server resources injected into every route as axum state
// ABOUTME: Wires the database, provider registry, broadcast bus, tunnel hub, and generation pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::sync::Arc;

use tracing::info;

use crate::bus::BroadcastBus;
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::generation::GenerationPipeline;
use crate::llm::{OllamaProvider, OpenAiCompatibleConfig, OpenAiCompatibleProvider, ProviderRegistry};
use crate::tunnel::TunnelHub;

/// Everything a request handler needs, created once at startup
#[derive(Clone)]
pub struct ServerResources {
    /// Chat and message storage
    pub database: Database,
    /// Message mutations and background generations
    pub pipeline: GenerationPipeline,
    /// Registered model providers
    pub providers: Arc<ProviderRegistry>,
    /// Event fan-out to connected clients
    pub bus: Arc<BroadcastBus>,
    /// Server side of the request tunnel
    pub tunnel_hub: Arc<TunnelHub>,
    /// Loaded configuration
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Open the database and register the configured providers
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a provider client
    /// cannot be created
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        let database = Database::new(&config.database.url.to_connection_string()).await?;
        let tunnel_hub = Arc::new(TunnelHub::new());

        let mut registry = ProviderRegistry::new();
        if config.ollama.enabled {
            registry.register(Arc::new(OllamaProvider::from_config(
                &config.ollama,
                &tunnel_hub,
            )?));
        }
        registry.register(Arc::new(OpenAiCompatibleProvider::new(
            OpenAiCompatibleConfig::from(&config.hosted),
        )?));
        info!(providers = registry.len(), "Providers registered");

        Ok(Self::from_parts(database, registry, tunnel_hub, config))
    }

    /// Assemble resources around an existing database and registry
    #[must_use]
    pub fn from_parts(
        database: Database,
        providers: ProviderRegistry,
        tunnel_hub: Arc<TunnelHub>,
        config: ServerConfig,
    ) -> Self {
        let providers = Arc::new(providers);
        let bus = Arc::new(BroadcastBus::new());
        let pipeline = GenerationPipeline::new(
            database.clone(),
            Arc::clone(&providers),
            Arc::clone(&bus),
            config.generation.clone(),
        );

        Self {
            database,
            pipeline,
            providers,
            bus,
            tunnel_hub,
            config: Arc::new(config),
        }
    }
}
