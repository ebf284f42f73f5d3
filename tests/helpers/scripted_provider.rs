// ABOUTME: In-process model provider that replays scripted completions for tests
// ABOUTME: Supports chunk delays, failures, a semaphore start gate, and request capture
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatloom::errors::{AppError, AppResult};
use chatloom::llm::{
    ChatRequest, ChatStream, LlmCapabilities, LlmProvider, ModelInfo, StreamChunk,
};
use tokio::sync::Semaphore;

/// One scripted completion
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these deltas, sleeping `delay` before each
    Chunks {
        /// Text deltas in order
        chunks: Vec<String>,
        /// Pause before every delta
        delay: Duration,
    },
    /// Fail before streaming anything
    Fail(String),
}

impl ScriptedReply {
    /// Deltas without delay
    pub fn text(chunks: &[&str]) -> Self {
        Self::Chunks {
            chunks: chunks.iter().map(|c| (*c).to_owned()).collect(),
            delay: Duration::ZERO,
        }
    }

    /// Deltas with a pause before each
    pub fn slow(chunks: &[&str], delay: Duration) -> Self {
        Self::Chunks {
            chunks: chunks.iter().map(|c| (*c).to_owned()).collect(),
            delay,
        }
    }
}

/// Provider answering from a queue of scripted replies
pub struct ScriptedProvider {
    id: String,
    enabled: AtomicBool,
    models: Vec<ModelInfo>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<ChatRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    /// Provider with the given id and model that answers "Hello, world"
    pub fn new(id: &str, model_id: &str) -> Self {
        Self {
            id: id.to_owned(),
            enabled: AtomicBool::new(true),
            models: vec![ModelInfo {
                id: model_id.to_owned(),
                name: "Scripted Model".to_owned(),
            }],
            replies: Mutex::new(VecDeque::new()),
            fallback: ScriptedReply::text(&["Hello", ", world"]),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Hold every stream until the gate hands it a permit
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reply used once the queue is empty
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Queue a reply for the next completion
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Toggle availability
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Scripted"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn models(&self) -> AppResult<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }

    async fn complete_stream(
        &self,
        _model: &ModelInfo,
        request: &ChatRequest,
    ) -> AppResult<ChatStream> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (chunks, delay) = match reply {
            ScriptedReply::Fail(message) => {
                return Err(AppError::external_service(self.id.clone(), message));
            }
            ScriptedReply::Chunks { chunks, delay } => (chunks, delay),
        };
        let gate = self.gate.clone();

        Ok(Box::pin(async_stream::stream! {
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamChunk::delta(chunk));
            }
            yield Ok(StreamChunk::finished("stop"));
        }))
    }
}
