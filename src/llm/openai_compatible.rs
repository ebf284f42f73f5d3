// ABOUTME: Hosted OpenAI-compatible chat-completions provider with SSE streaming
// ABOUTME: Retries empty or transport-failed completions with a fixed delay before any output is produced
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # `OpenAI`-Compatible Provider
//!
//! Talks to any endpoint implementing `POST {base_url}/chat/completions` with
//! `stream: true`. Retries cover attempts that failed in transport, hit a
//! transient status, or finished with no text, as long as nothing was reported
//! to the progress listener yet. Once output has been shown, a failure is final.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::sse_parser::create_sse_stream;
use super::{
    ChatMessage, ChatRequest, ChatStream, LlmCapabilities, LlmProvider, ModelInfo,
    ProgressListener, StreamChunk,
};
use crate::config::HostedLlmConfig;
use crate::errors::{AppError, AppResult, ErrorCode};

/// Connection timeout for hosted endpoints
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whole-request timeout; long answers stream for a while
const REQUEST_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for OpenAiMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for the `OpenAI`-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Provider id stored on chats and messages
    pub provider_id: String,
    /// Display name
    pub display_name: String,
    /// Base URL including the version prefix (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Bearer token; the provider reports itself disabled without one
    pub api_key: Option<String>,
    /// Models offered to clients
    pub models: Vec<String>,
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl From<&HostedLlmConfig> for OpenAiCompatibleConfig {
    fn from(config: &HostedLlmConfig) -> Self {
        Self {
            provider_id: config.provider_id.clone(),
            display_name: "Hosted LLM".to_owned(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Hosted chat-completions provider
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

/// Result of one completion attempt
enum Attempt {
    Completed(String),
    Empty,
    Failed {
        error: AppError,
        produced_output: bool,
    },
}

/// Forwards progress while remembering whether anything was shown
struct TrackingListener<'a> {
    inner: Option<&'a dyn ProgressListener>,
    produced: AtomicBool,
}

#[async_trait]
impl ProgressListener for TrackingListener<'_> {
    async fn on_progress(&self, text: &str) {
        self.produced.store(true, Ordering::Relaxed);
        if let Some(inner) = self.inner {
            inner.on_progress(text).await;
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Create a new provider with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenAiCompatibleConfig) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        )
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    /// Map a non-success status to an error; transient statuses stay retryable
    fn parse_error_response(&self, status: reqwest::StatusCode, body: &str) -> AppError {
        let detail = serde_json::from_str::<OpenAiErrorResponse>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |parsed| parsed.error.message,
        );
        let service = self.config.provider_id.as_str();

        match status.as_u16() {
            429 => AppError::new(
                ErrorCode::ExternalRateLimited,
                format!("{service}: rate limited: {detail}"),
            ),
            status_code if is_retryable_status(status_code) => {
                AppError::external_unavailable(service, format!("HTTP {status}: {detail}"))
            }
            _ => AppError::external_service(service, format!("HTTP {status}: {detail}")),
        }
    }

    fn transport_error(&self, e: &reqwest::Error) -> AppError {
        if is_retryable_request_error(e) {
            AppError::external_unavailable(&self.config.provider_id, format!("transport: {e}"))
        } else {
            AppError::external_service(&self.config.provider_id, format!("request failed: {e}"))
        }
    }

    async fn attempt(
        &self,
        model: &ModelInfo,
        request: &ChatRequest,
        progress: Option<&dyn ProgressListener>,
    ) -> Attempt {
        let listener = TrackingListener {
            inner: progress,
            produced: AtomicBool::new(false),
        };

        let result = match self.complete_stream(model, request).await {
            Ok(mut stream) => super::drain_stream(&mut stream, Some(&listener)).await,
            Err(e) => Err(e),
        };
        let produced_output = listener.produced.load(Ordering::Relaxed);

        match result {
            Ok(text) if text.is_empty() => Attempt::Empty,
            Ok(text) => Attempt::Completed(text),
            Err(error) => Attempt::Failed {
                error,
                produced_output,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
    }

    async fn is_enabled(&self) -> bool {
        self.config.api_key.is_some() && !self.config.models.is_empty()
    }

    async fn models(&self) -> AppResult<Vec<ModelInfo>> {
        Ok(self
            .config
            .models
            .iter()
            .map(ModelInfo::named)
            .collect())
    }

    #[instrument(skip(self, request), fields(provider = %self.config.provider_id, model = %model.id))]
    async fn complete_stream(
        &self,
        model: &ModelInfo,
        request: &ChatRequest,
    ) -> AppResult<ChatStream> {
        let body = OpenAiRequest {
            model: &model.id,
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: request.temperature,
            stream: true,
        };
        debug!(messages = body.messages.len(), "Sending streaming completion request");

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send completion request");
                self.transport_error(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error_response(status, &body));
        }

        let service = self.config.provider_id.clone();
        let bytes = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| AppError::external_unavailable(&service, format!("stream read: {e}")))
        });

        Ok(create_sse_stream(Box::pin(bytes), parse_stream_data))
    }

    async fn chat(
        &self,
        model: &ModelInfo,
        request: &ChatRequest,
        progress: Option<&dyn ProgressListener>,
    ) -> AppResult<String> {
        let mut attempt_number: u32 = 0;
        loop {
            let failure = match self.attempt(model, request, progress).await {
                Attempt::Completed(text) => return Ok(text),
                Attempt::Empty => {
                    AppError::external_unavailable(&self.config.provider_id, "empty completion")
                }
                Attempt::Failed {
                    error,
                    produced_output,
                } => {
                    if produced_output || !error.code.is_transient() {
                        return Err(error);
                    }
                    error
                }
            };

            if attempt_number >= self.config.max_retries {
                // Out of retries: a transient failure becomes a provider failure
                return Err(AppError::new(
                    ErrorCode::ExternalServiceError,
                    failure.message,
                ));
            }
            attempt_number += 1;
            warn!(
                provider = %self.config.provider_id,
                attempt = attempt_number,
                max_retries = self.config.max_retries,
                error = %failure,
                "Retrying completion"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

fn parse_stream_data(json: &str) -> Option<Result<StreamChunk, AppError>> {
    match serde_json::from_str::<OpenAiStreamChunk>(json) {
        Ok(chunk) => {
            let choice = chunk.choices.into_iter().next()?;
            let delta = choice.delta.content.unwrap_or_default();
            Some(Ok(StreamChunk {
                delta,
                is_final: choice.finish_reason.is_some(),
                finish_reason: choice.finish_reason,
            }))
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse stream chunk");
            None
        }
    }
}

/// Statuses worth another attempt
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Connection and timeout failures are worth another attempt
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}
