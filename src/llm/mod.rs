// ABOUTME: Language-model provider abstraction used by the generation pipeline
// ABOUTME: Defines the streaming provider contract, progress listeners, and the provider registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # LLM Provider Interface
//!
//! Providers are opaque capabilities: they list models and stream a completion
//! for a role-tagged conversation. The generation pipeline only ever calls
//! [`LlmProvider::chat`], which drains the stream and reports the accumulated
//! text to an optional [`ProgressListener`].
//!
//! ## Implementations
//!
//! - [`OllamaProvider`]: local model server, reached directly or through the
//!   request tunnel
//! - [`OpenAiCompatibleProvider`]: hosted chat-completions API with retry of
//!   transient failures

mod ollama;
mod openai_compatible;
pub mod sse_parser;

pub use ollama::{OllamaBackend, OllamaProvider};
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::errors::{AppError, AppResult};
use crate::models::{Message, Sender};

// ============================================================================
// Capability Flags
// ============================================================================

bitflags::bitflags! {
    /// Provider capability flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LlmCapabilities: u8 {
        /// Provider streams partial output
        const STREAMING = 0b0000_0001;
        /// Provider honors system messages
        const SYSTEM_MESSAGES = 0b0000_0010;
        /// Provider can be routed through the request tunnel
        const TUNNELLED = 0b0000_0100;
    }
}

impl LlmCapabilities {
    /// Streaming text provider with system prompts
    #[must_use]
    pub const fn text_only() -> Self {
        Self::STREAMING.union(Self::SYSTEM_MESSAGES)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl From<Sender> for MessageRole {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => Self::User,
            Sender::Ai => Self::Assistant,
        }
    }
}

/// A single message in a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Input to a completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Create a new chat request with messages
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    /// Build the context for a generation from the ancestor chain
    ///
    /// Placeholders still generating and failed replies carry no text and are
    /// left out.
    #[must_use]
    pub fn from_history(system_prompt: Option<&str>, history: &[Message]) -> Self {
        let system = system_prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .map(ChatMessage::system);

        let turns = history
            .iter()
            .filter(|message| !message.is_generating && message.error.is_none())
            .map(|message| ChatMessage::new(message.sender.into(), message.text.clone()));

        Self::new(system.into_iter().chain(turns).collect())
    }

    /// Set the temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A chunk of a streaming response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta for this chunk
    pub delta: String,
    /// Whether this is the final chunk
    pub is_final: bool,
    /// Finish reason if final
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// Non-final chunk carrying text
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            is_final: false,
            finish_reason: None,
        }
    }

    /// Terminal chunk
    #[must_use]
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            is_final: true,
            finish_reason: Some(reason.into()),
        }
    }
}

/// Stream type for chat completion responses
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AppError>> + Send>>;

/// Raw response body, whichever transport produced it
pub type ByteStream = Pin<Box<dyn Stream<Item = AppResult<Bytes>> + Send>>;

/// A model offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Identifier sent to the provider
    pub id: String,
    /// Display name
    pub name: String,
}

impl ModelInfo {
    /// Model whose display name is its id
    #[must_use]
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Receives the accumulated text of a running completion
#[async_trait]
pub trait ProgressListener: Send + Sync {
    /// Called after every non-empty delta with the full text so far
    async fn on_progress(&self, text: &str);
}

/// LLM provider trait for chat completion
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique provider identifier stored on chats and messages
    fn id(&self) -> &str;

    /// Human-readable display name for the provider
    fn display_name(&self) -> &str;

    /// Provider capabilities
    fn capabilities(&self) -> LlmCapabilities;

    /// Whether the provider can serve requests right now
    async fn is_enabled(&self) -> bool;

    /// Models this provider offers
    async fn models(&self) -> AppResult<Vec<ModelInfo>>;

    /// Look up one model by id
    async fn get_model_by_id(&self, model_id: &str) -> AppResult<Option<ModelInfo>> {
        Ok(self
            .models()
            .await?
            .into_iter()
            .find(|model| model.id == model_id))
    }

    /// Start a streaming completion
    async fn complete_stream(&self, model: &ModelInfo, request: &ChatRequest)
        -> AppResult<ChatStream>;

    /// Run a completion to the end, reporting progress along the way
    async fn chat(
        &self,
        model: &ModelInfo,
        request: &ChatRequest,
        progress: Option<&dyn ProgressListener>,
    ) -> AppResult<String> {
        let mut stream = self.complete_stream(model, request).await?;
        drain_stream(&mut stream, progress).await
    }
}

/// Accumulate a completion stream into its full text
///
/// # Errors
///
/// Returns the first error carried by the stream
pub async fn drain_stream(
    stream: &mut ChatStream,
    progress: Option<&dyn ProgressListener>,
) -> AppResult<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.delta.is_empty() {
            text.push_str(&chunk.delta);
            if let Some(listener) = progress {
                listener.on_progress(&text).await;
            }
        }
        if chunk.is_final {
            break;
        }
    }
    Ok(text)
}

// ============================================================================
// Provider Registry
// ============================================================================

/// Registry for LLM providers, in registration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider with the same id
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.retain(|existing| existing.id() != provider.id());
        self.providers.push(provider);
    }

    /// Get a provider by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// All registered providers
    #[must_use]
    pub fn list(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
