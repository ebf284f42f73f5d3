// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides in-memory databases, scripted-provider resources, and wait helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `chatloom`

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use chatloom::{
    bus::EventStreamHandle,
    config::{GenerationConfig, ServerConfig},
    database::Database,
    events::SubscriptionEvent,
    llm::{LlmProvider, ProviderRegistry},
    models::{Chat, Message, NewChat},
    resources::ServerResources,
    tunnel::TunnelHub,
};

static INIT_LOGGER: Once = Once::new();

/// Provider id used by the scripted test provider
pub const TEST_PROVIDER_ID: &str = "scripted";
/// Model id offered by the scripted test provider
pub const TEST_MODEL_ID: &str = "scripted-model";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Standard test database setup
pub async fn create_test_database() -> Result<Database> {
    init_test_logging();
    Ok(Database::new("sqlite::memory:").await?)
}

/// Generation settings with a short settle delay and no title summaries
pub fn test_generation_config() -> GenerationConfig {
    GenerationConfig {
        throttle: Duration::from_millis(100),
        settle_delay: Duration::from_millis(20),
        summarize_titles: false,
    }
}

/// Server resources around an in-memory database and the given providers
pub async fn create_test_resources(
    providers: Vec<Arc<dyn LlmProvider>>,
    generation: GenerationConfig,
) -> Result<Arc<ServerResources>> {
    let database = create_test_database().await?;

    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }

    let config = ServerConfig {
        generation,
        ..ServerConfig::default()
    };

    Ok(Arc::new(ServerResources::from_parts(
        database,
        registry,
        Arc::new(TunnelHub::new()),
        config,
    )))
}

/// Chat bound to the scripted provider
pub async fn create_test_chat(database: &Database) -> Result<Chat> {
    Ok(database
        .create_chat(&NewChat {
            title: "Test chat".to_owned(),
            provider_id: TEST_PROVIDER_ID.to_owned(),
            model_id: TEST_MODEL_ID.to_owned(),
            system_prompt: None,
            temperature: None,
        })
        .await?)
}

/// Poll a message until its generation has finished
pub async fn wait_for_generation(database: &Database, message_id: i64) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(message) = database.get_message(message_id).await.unwrap() {
                if !message.is_generating {
                    return message;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("generation did not finish in time")
}

/// Receive the next event from a bus handle, parsed
pub async fn next_event(handle: &mut EventStreamHandle) -> SubscriptionEvent {
    let frame = tokio::time::timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("no event within timeout")
        .expect("bus channel closed");
    serde_json::from_str(&frame).expect("event frame is valid JSON")
}

/// Collect events until one matches, returning everything received
pub async fn events_until<F>(handle: &mut EventStreamHandle, mut done: F) -> Vec<SubscriptionEvent>
where
    F: FnMut(&SubscriptionEvent) -> bool,
{
    let mut events = Vec::new();
    loop {
        let event = next_event(handle).await;
        let stop = done(&event);
        events.push(event);
        if stop {
            return events;
        }
    }
}
