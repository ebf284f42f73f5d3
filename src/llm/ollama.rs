// ABOUTME: Local Ollama provider speaking the native /api/chat NDJSON stream and /api/tags listing
// ABOUTME: Reaches the model server directly over HTTP or through the request tunnel hub
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Ollama Provider
//!
//! Ollama streams one JSON object per line; the last one has `"done": true`.
//! When the chat server cannot reach the Ollama host, the same requests travel
//! through the [`TunnelHub`] and the provider is only enabled while a tunnel
//! client is attached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::{
    ByteStream, ChatRequest, ChatStream, LlmCapabilities, LlmProvider, ModelInfo, StreamChunk,
};
use crate::config::{OllamaConfig, OllamaTransport};
use crate::constants::providers::OLLAMA_PROVIDER_ID;
use crate::errors::{AppError, AppResult};
use crate::tunnel::{TunnelHub, TunnelRequest};

/// Connection timeout for the local server
const CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamLine {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// How requests reach the Ollama server
#[derive(Clone)]
pub enum OllamaBackend {
    /// Plain HTTP from the chat server
    Direct(Client),
    /// Relayed through the tunnel client
    Tunnel(Arc<TunnelHub>),
}

impl OllamaBackend {
    /// Direct HTTP backend
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn direct() -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::Direct(client))
    }
}

/// Local Ollama model server
pub struct OllamaProvider {
    base_url: String,
    backend: OllamaBackend,
}

impl OllamaProvider {
    /// Create a provider for the given base URL (without `/api`)
    #[must_use]
    pub fn new(base_url: impl Into<String>, backend: OllamaBackend) -> Self {
        Self {
            base_url: base_url.into(),
            backend,
        }
    }

    /// Create from configuration, using the hub when the transport is `tunnel`
    ///
    /// # Errors
    ///
    /// Returns an error if the direct HTTP client cannot be created.
    pub fn from_config(config: &OllamaConfig, hub: &Arc<TunnelHub>) -> AppResult<Self> {
        let backend = match config.transport {
            OllamaTransport::Direct => OllamaBackend::direct()?,
            OllamaTransport::Tunnel => OllamaBackend::Tunnel(Arc::clone(hub)),
        };
        Ok(Self::new(config.base_url.clone(), backend))
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}", self.base_url.trim_end_matches('/'))
    }

    /// Send a request and return the status plus the body stream
    async fn send(&self, request: TunnelRequest) -> AppResult<(u16, ByteStream)> {
        match &self.backend {
            OllamaBackend::Direct(client) => {
                let builder = if request.method == "POST" {
                    client
                        .post(&request.url)
                        .header("Content-Type", "application/json")
                        .body(request.body.unwrap_or_default())
                } else {
                    client.get(&request.url)
                };

                let response = builder.send().await.map_err(|e| {
                    error!(error = %e, url = %request.url, "Failed to reach Ollama");
                    AppError::external_unavailable(
                        OLLAMA_PROVIDER_ID,
                        format!("Cannot connect to Ollama at {}: {e}", self.base_url),
                    )
                })?;

                let status = response.status().as_u16();
                let bytes: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
                    chunk.map_err(|e| {
                        AppError::external_unavailable(OLLAMA_PROVIDER_ID, format!("stream read: {e}"))
                    })
                }));
                Ok((status, bytes))
            }
            OllamaBackend::Tunnel(hub) => {
                let response = hub.fetch(request).await?;
                let status = response.status;
                let bytes: ByteStream = Box::pin(response.into_stream());
                Ok((status, bytes))
            }
        }
    }

    async fn read_error_body(status: u16, mut body: ByteStream) -> AppError {
        let mut text = Vec::new();
        while let Some(Ok(chunk)) = body.next().await {
            text.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&text);
        let detail = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
            .unwrap_or_else(|| text.chars().take(200).collect());

        AppError::external_service(OLLAMA_PROVIDER_ID, format!("HTTP {status}: {detail}"))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn id(&self) -> &str {
        OLLAMA_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Ollama (Local)"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only() | LlmCapabilities::TUNNELLED
    }

    async fn is_enabled(&self) -> bool {
        match &self.backend {
            OllamaBackend::Direct(_) => true,
            OllamaBackend::Tunnel(hub) => hub.is_connected().await,
        }
    }

    #[instrument(skip(self))]
    async fn models(&self) -> AppResult<Vec<ModelInfo>> {
        let (status, mut body) = self.send(TunnelRequest::get(self.api_url("tags"))).await?;
        if !(200..300).contains(&status) {
            return Err(Self::read_error_body(status, body).await);
        }

        let mut raw = Vec::new();
        while let Some(chunk) = body.next().await {
            raw.extend_from_slice(&chunk?);
        }
        let tags: OllamaTags = serde_json::from_slice(&raw).map_err(|e| {
            AppError::external_service(OLLAMA_PROVIDER_ID, format!("invalid model list: {e}"))
        })?;

        debug!(count = tags.models.len(), "Listed Ollama models");
        Ok(tags
            .models
            .into_iter()
            .map(|model| ModelInfo::named(model.name))
            .collect())
    }

    #[instrument(skip(self, request), fields(model = %model.id))]
    async fn complete_stream(
        &self,
        model: &ModelInfo,
        request: &ChatRequest,
    ) -> AppResult<ChatStream> {
        let body = OllamaChatRequest {
            model: &model.id,
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            options: request
                .temperature
                .map(|temperature| OllamaOptions { temperature }),
        };
        let payload = serde_json::to_string(&body)?;

        let (status, bytes) = self
            .send(TunnelRequest::post_json(self.api_url("chat"), payload))
            .await?;
        if !(200..300).contains(&status) {
            return Err(Self::read_error_body(status, bytes).await);
        }

        Ok(ndjson_stream(bytes))
    }
}

/// Parse Ollama's newline-delimited JSON into stream chunks
fn ndjson_stream(mut bytes: ByteStream) -> ChatStream {
    Box::pin(async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(read) = bytes.next().await {
            match read {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(item) = parse_line(&line) {
                    let stop = !matches!(&item, Ok(chunk) if !chunk.is_final);
                    yield item;
                    if stop {
                        return;
                    }
                }
            }
        }

        if let Some(item) = parse_line(&buffer) {
            yield item;
        }
    })
}

fn parse_line(line: &[u8]) -> Option<AppResult<StreamChunk>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_slice::<OllamaStreamLine>(trimmed) {
        Ok(parsed) => {
            if let Some(error) = parsed.error {
                return Some(Err(AppError::external_service(OLLAMA_PROVIDER_ID, error)));
            }
            let delta = parsed.message.map(|m| m.content).unwrap_or_default();
            if parsed.done {
                return Some(Ok(StreamChunk {
                    delta,
                    is_final: true,
                    finish_reason: parsed.done_reason.or_else(|| Some("stop".to_owned())),
                }));
            }
            (!delta.is_empty()).then(|| Ok(StreamChunk::delta(delta)))
        }
        Err(e) => {
            warn!(error = %e, "Skipping unparseable Ollama stream line");
            None
        }
    }
}
