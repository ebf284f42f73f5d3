// ABOUTME: Send, regenerate, duplicate, edit, and delete operations over the message tree
// ABOUTME: Persists placeholders transactionally and streams provider output into them in the background
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Generation Pipeline
//!
//! Every assistant message goes pending → streaming → completed or failed.
//! Callers get the inserted rows back immediately; the provider call runs in a
//! spawned task whose outcome is visible only through the message row and the
//! broadcast bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::throttle::ProgressThrottle;
use crate::bus::BroadcastBus;
use crate::config::GenerationConfig;
use crate::constants::generation::{DEFAULT_AI_SENDER_NAME, DEFAULT_CHAT_TITLE, MAX_TITLE_CHARS};
use crate::database::{history, messages, next_timestamp, Database};
use crate::errors::{AppError, AppResult};
use crate::events::SubscriptionEvent;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, ModelInfo, ProgressListener, ProviderRegistry};
use crate::models::{Chat, Message, NewChat, NewMessage, Sender};

const TITLE_PROMPT: &str = "Summarize the user's message as a short chat title of at most \
     six words. Reply with the title only, without quotes or punctuation at the end.";

/// Rows created by a send: the user message and its assistant placeholder
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessages {
    /// The new user message
    pub user_message: Message,
    /// The assistant placeholder being generated
    pub ai_message: Message,
}

/// Result of an edit
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EditOutcome {
    /// Text was replaced in place
    Updated {
        /// The edited message
        message: Message,
    },
    /// A new sibling branch was sent with the new text
    Branched {
        /// Rows of the new branch
        sent: SentMessages,
    },
}

/// A chat with its optional first exchange
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChat {
    /// The stored chat
    pub chat: Chat,
    /// Rows created by the first message, if one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<SentMessages>,
}

/// Orchestrates message mutations and background generations
#[derive(Clone)]
pub struct GenerationPipeline {
    database: Database,
    providers: Arc<ProviderRegistry>,
    bus: Arc<BroadcastBus>,
    config: GenerationConfig,
}

/// Inputs of one background generation
struct GenerationJob {
    chat: Chat,
    provider: Arc<dyn LlmProvider>,
    model: ModelInfo,
    message: Message,
    history: Vec<Message>,
}

impl GenerationPipeline {
    /// Create a pipeline
    #[must_use]
    pub const fn new(
        database: Database,
        providers: Arc<ProviderRegistry>,
        bus: Arc<BroadcastBus>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            database,
            providers,
            bus,
            config,
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    async fn require_chat(&self, chat_id: i64) -> AppResult<Chat> {
        self.database
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Chat {chat_id}")))
    }

    async fn require_message(&self, message_id: i64) -> AppResult<Message> {
        self.database
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Message {message_id}")))
    }

    /// Resolve and check the provider and model a chat generates with
    async fn resolve_model(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> AppResult<(Arc<dyn LlmProvider>, ModelInfo)> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| AppError::not_found(format!("Provider {provider_id}")))?;

        if !provider.is_enabled().await {
            return Err(AppError::unavailable(format!(
                "Provider {provider_id} is disabled"
            )));
        }

        let model = provider
            .get_model_by_id(model_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Model {model_id}")))?;

        Ok((provider, model))
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Send a user message under `parent_id` and start the assistant reply
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown chat, provider, model, or parent;
    /// `ResourceUnavailable` for a disabled provider. Nothing is written then.
    #[instrument(skip(self, text), fields(chat_id, parent_id = ?parent_id))]
    pub async fn send_message(
        &self,
        chat_id: i64,
        parent_id: Option<i64>,
        text: &str,
        sender_name: &str,
    ) -> AppResult<SentMessages> {
        let chat = self.require_chat(chat_id).await?;
        let (provider, model) = self.resolve_model(&chat.provider_id, &chat.model_id).await?;

        if let Some(parent_id) = parent_id {
            let parent = self.require_message(parent_id).await?;
            if parent.chat_id != chat_id {
                return Err(AppError::not_found(format!("Message {parent_id}")));
            }
        }

        let mut tx = self.database.begin().await?;
        let latest = messages::latest_timestamp(&mut *tx, chat_id).await?;
        let user_message = messages::insert_message(
            &mut *tx,
            &NewMessage::user(chat_id, parent_id, sender_name, text, next_timestamp(latest)),
        )
        .await?;
        let history = history::ancestors(&mut *tx, user_message.id).await?;
        let ai_message = messages::insert_message(
            &mut *tx,
            &NewMessage::ai_placeholder(
                chat_id,
                user_message.id,
                ai_sender_name(&model),
                provider.id(),
                &model.id,
                next_timestamp(Some(user_message.created_at)),
            ),
        )
        .await?;
        tx.commit().await?;

        info!(
            user_message_id = user_message.id,
            ai_message_id = ai_message.id,
            "Message sent"
        );

        self.spawn_generation(GenerationJob {
            chat,
            provider,
            model,
            message: ai_message.clone(),
            history,
        });

        Ok(SentMessages {
            user_message,
            ai_message,
        })
    }

    /// Generate another assistant variant under a user message
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the parent is an assistant message
    #[instrument(skip(self))]
    pub async fn regenerate(&self, parent_id: i64) -> AppResult<Message> {
        let parent = self.require_message(parent_id).await?;
        if parent.sender == Sender::Ai {
            return Err(AppError::invalid_transition(
                "Cannot generate a reply to an assistant message",
            ));
        }

        let chat = self.require_chat(parent.chat_id).await?;
        let (provider, model) = self.resolve_model(&chat.provider_id, &chat.model_id).await?;

        let mut tx = self.database.begin().await?;
        let latest = messages::latest_timestamp(&mut *tx, chat.id).await?;
        let history = history::ancestors(&mut *tx, parent.id).await?;
        let ai_message = messages::insert_message(
            &mut *tx,
            &NewMessage::ai_placeholder(
                chat.id,
                parent.id,
                ai_sender_name(&model),
                provider.id(),
                &model.id,
                next_timestamp(latest),
            ),
        )
        .await?;
        tx.commit().await?;

        self.spawn_generation(GenerationJob {
            chat,
            provider,
            model,
            message: ai_message.clone(),
            history,
        });

        Ok(ai_message)
    }

    /// Generate another variant next to an existing assistant message
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the target is a user message
    pub async fn regenerate_message(&self, message_id: i64) -> AppResult<Message> {
        let message = self.require_message(message_id).await?;
        if message.sender == Sender::User {
            return Err(AppError::invalid_transition(
                "Only assistant messages can be regenerated",
            ));
        }
        let parent_id = message
            .parent_id
            .ok_or_else(|| AppError::invalid_transition("Assistant message has no parent"))?;

        self.regenerate(parent_id).await
    }

    /// Copy an assistant message into a new sibling without calling a provider
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for user messages and for messages still generating
    pub async fn duplicate(&self, message_id: i64) -> AppResult<Message> {
        let source = self.require_message(message_id).await?;
        if source.sender == Sender::User {
            return Err(AppError::invalid_transition(
                "Only assistant messages can be duplicated",
            ));
        }
        if source.is_generating {
            return Err(AppError::invalid_transition(
                "Cannot duplicate a message that is still generating",
            ));
        }

        let mut tx = self.database.begin().await?;
        let latest = messages::latest_timestamp(&mut *tx, source.chat_id).await?;
        let copy = messages::insert_message(
            &mut *tx,
            &NewMessage {
                chat_id: source.chat_id,
                parent_id: source.parent_id,
                sender: Sender::Ai,
                sender_name: source.sender_name.clone(),
                text: source.text.clone(),
                is_generating: false,
                provider_id: source.provider_id.clone(),
                model_id: source.model_id.clone(),
                created_at: next_timestamp(latest),
            },
        )
        .await?;
        tx.commit().await?;

        debug!(source = source.id, copy = copy.id, "Message duplicated");
        Ok(copy)
    }

    /// Edit a message in place, or branch a user message with new text
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when asking to regenerate from an assistant message
    /// and when the message is still generating
    pub async fn edit(
        &self,
        message_id: i64,
        new_text: &str,
        regenerate: bool,
    ) -> AppResult<EditOutcome> {
        let message = self.require_message(message_id).await?;

        match (message.sender, regenerate) {
            (Sender::User, true) => {
                let sent = self
                    .send_message(
                        message.chat_id,
                        message.parent_id,
                        new_text,
                        &message.sender_name,
                    )
                    .await?;
                Ok(EditOutcome::Branched { sent })
            }
            (Sender::Ai, true) => Err(AppError::invalid_transition(
                "Assistant messages cannot be edited with regeneration",
            )),
            (_, false) => {
                if message.is_generating {
                    return Err(AppError::invalid_transition(
                        "Cannot edit a message that is still generating",
                    ));
                }
                if !self
                    .database
                    .update_message_text(message_id, new_text)
                    .await?
                {
                    return Err(match self.database.get_message(message_id).await? {
                        Some(_) => AppError::invalid_transition(
                            "Cannot edit a message that is still generating",
                        ),
                        None => AppError::not_found(format!("Message {message_id}")),
                    });
                }
                self.bus
                    .broadcast(&SubscriptionEvent::edited(
                        message_id,
                        message.chat_id,
                        new_text.to_owned(),
                    ))
                    .await;

                Ok(EditOutcome::Updated {
                    message: Message {
                        text: new_text.to_owned(),
                        ..message
                    },
                })
            }
        }
    }

    /// Delete a message and its whole subtree; returns the removed rows
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for the only root of a chat and for the only
    /// assistant reply under its parent; nothing is deleted then.
    #[instrument(skip(self))]
    pub async fn delete_message(&self, message_id: i64) -> AppResult<Vec<Message>> {
        let mut tx = self.database.begin().await?;
        let message = messages::fetch_message(&mut *tx, message_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Message {message_id}")))?;

        match message.parent_id {
            None => {
                if messages::count_roots(&mut *tx, message.chat_id).await? <= 1 {
                    return Err(AppError::invalid_transition(
                        "Cannot delete the only root message of a chat",
                    ));
                }
            }
            Some(parent_id) if message.sender == Sender::Ai => {
                if messages::count_children(&mut *tx, parent_id).await? <= 1 {
                    return Err(AppError::invalid_transition(
                        "Cannot delete the only reply to a message",
                    ));
                }
            }
            Some(_) => {}
        }

        let removed = history::descendants(&mut *tx, message_id).await?;
        history::delete_subtree(&mut *tx, message_id).await?;
        tx.commit().await?;

        info!(message_id, removed = removed.len(), "Subtree deleted");
        Ok(removed)
    }

    // ========================================================================
    // Chat Operations
    // ========================================================================

    /// Create a chat, optionally sending its first message
    ///
    /// With a first message and summarization enabled, a background call
    /// proposes a better title.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown provider or model
    pub async fn create_chat(
        &self,
        mut new_chat: NewChat,
        first_message: Option<&str>,
        sender_name: &str,
    ) -> AppResult<CreatedChat> {
        let (provider, model) = if first_message.is_some() {
            let (provider, model) = self
                .resolve_model(&new_chat.provider_id, &new_chat.model_id)
                .await?;
            (Some(provider), Some(model))
        } else {
            if self.providers.get(&new_chat.provider_id).is_none() {
                return Err(AppError::not_found(format!(
                    "Provider {}",
                    new_chat.provider_id
                )));
            }
            (None, None)
        };

        if new_chat.title.trim().is_empty() {
            new_chat.title = first_message
                .map(|text| truncate_title(text.trim()))
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_owned());
        }

        let chat = self.database.create_chat(&new_chat).await?;
        info!(chat_id = chat.id, provider = %chat.provider_id, "Chat created");

        let Some(text) = first_message else {
            return Ok(CreatedChat { chat, sent: None });
        };

        let sent = self.send_message(chat.id, None, text, sender_name).await?;

        if self.config.summarize_titles {
            if let (Some(provider), Some(model)) = (provider, model) {
                let pipeline = self.clone();
                let chat_id = chat.id;
                let text = text.to_owned();
                tokio::spawn(async move {
                    pipeline.summarize_title(chat_id, provider, model, text).await;
                });
            }
        }

        Ok(CreatedChat {
            chat,
            sent: Some(sent),
        })
    }

    /// Rename a chat and notify subscribers
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a blank title, `ResourceNotFound` for an unknown chat
    pub async fn rename_chat(&self, chat_id: i64, title: &str) -> AppResult<Chat> {
        let title = truncate_title(title.trim());
        if title.is_empty() {
            return Err(AppError::invalid_input("Title must not be empty"));
        }

        if !self.database.rename_chat(chat_id, &title).await? {
            return Err(AppError::not_found(format!("Chat {chat_id}")));
        }
        self.bus
            .broadcast(&SubscriptionEvent::renamed(chat_id, title))
            .await;

        self.require_chat(chat_id).await
    }

    /// Delete a chat and all of its messages
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown chat
    pub async fn delete_chat(&self, chat_id: i64) -> AppResult<()> {
        if self.database.delete_chat(chat_id).await? {
            info!(chat_id, "Chat deleted");
            Ok(())
        } else {
            Err(AppError::not_found(format!("Chat {chat_id}")))
        }
    }

    async fn summarize_title(
        &self,
        chat_id: i64,
        provider: Arc<dyn LlmProvider>,
        model: ModelInfo,
        text: String,
    ) {
        let request = ChatRequest::new(vec![ChatMessage::system(TITLE_PROMPT), ChatMessage::user(text)]);

        let title = match provider.chat(&model, &request, None).await {
            Ok(raw) => clean_title(&raw),
            Err(e) => {
                warn!(chat_id, error = %e, "Title summarization failed");
                return;
            }
        };
        if title.is_empty() {
            return;
        }

        match self.database.rename_chat(chat_id, &title).await {
            Ok(true) => {
                debug!(chat_id, title = %title, "Chat title summarized");
                self.bus
                    .broadcast(&SubscriptionEvent::renamed(chat_id, title))
                    .await;
            }
            Ok(false) => debug!(chat_id, "Chat deleted before its title was summarized"),
            Err(e) => warn!(chat_id, error = %e, "Failed to store summarized title"),
        }
    }

    // ========================================================================
    // Background Generation
    // ========================================================================

    fn spawn_generation(&self, job: GenerationJob) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run_generation(job).await;
        });
    }

    #[instrument(skip_all, fields(message_id = job.message.id, chat_id = job.chat.id, model = %job.model.id))]
    async fn run_generation(&self, job: GenerationJob) {
        let request = ChatRequest::from_history(job.chat.system_prompt.as_deref(), &job.history)
            .with_temperature(job.chat.temperature);

        let listener = GenerationProgress {
            database: &self.database,
            bus: &self.bus,
            message_id: job.message.id,
            chat_id: job.chat.id,
            throttle: Mutex::new(ProgressThrottle::new(self.config.throttle)),
        };

        match job.provider.chat(&job.model, &request, Some(&listener)).await {
            Ok(text) => self.complete(&job.message, text).await,
            Err(e) => self.fail(&job.message, &e).await,
        }
    }

    async fn complete(&self, message: &Message, text: String) {
        match self.database.complete_generation(message.id, &text).await {
            Ok(true) => {
                let event = SubscriptionEvent::generation(message.id, message.chat_id, text, false);
                self.bus.broadcast(&event).await;
                info!(message_id = message.id, "Generation completed");

                // Second copy for clients that attached during the first
                tokio::time::sleep(self.config.settle_delay).await;
                self.bus.broadcast(&event).await;
            }
            Ok(false) => debug!(message_id = message.id, "Message deleted during generation"),
            Err(e) => error!(message_id = message.id, error = %e, "Failed to store completion"),
        }
    }

    async fn fail(&self, message: &Message, failure: &AppError) {
        warn!(message_id = message.id, error = %failure, "Generation failed");

        match self
            .database
            .fail_generation(message.id, &failure.message)
            .await
        {
            Ok(true) => {
                self.bus
                    .broadcast(&SubscriptionEvent::generation_failed(
                        message.id,
                        message.chat_id,
                        failure.message.clone(),
                    ))
                    .await;
            }
            Ok(false) => debug!(message_id = message.id, "Message deleted during generation"),
            Err(e) => error!(message_id = message.id, error = %e, "Failed to record failure"),
        }
    }
}

/// Writes throttled progress into the row and onto the bus
struct GenerationProgress<'a> {
    database: &'a Database,
    bus: &'a BroadcastBus,
    message_id: i64,
    chat_id: i64,
    throttle: Mutex<ProgressThrottle>,
}

#[async_trait]
impl ProgressListener for GenerationProgress<'_> {
    async fn on_progress(&self, text: &str) {
        if !self.throttle.lock().await.should_emit(Instant::now()) {
            return;
        }

        match self.database.record_progress(self.message_id, text).await {
            Ok(true) => {
                self.bus
                    .broadcast(&SubscriptionEvent::generation(
                        self.message_id,
                        self.chat_id,
                        text.to_owned(),
                        true,
                    ))
                    .await;
            }
            Ok(false) => debug!(message_id = self.message_id, "Progress for deleted message dropped"),
            Err(e) => warn!(message_id = self.message_id, error = %e, "Failed to store progress"),
        }
    }
}

fn ai_sender_name(model: &ModelInfo) -> &str {
    if model.name.is_empty() {
        DEFAULT_AI_SENDER_NAME
    } else {
        &model.name
    }
}

/// Cut a title to the maximum length on a character boundary
fn truncate_title(title: &str) -> String {
    let first_line = title.lines().next().unwrap_or_default().trim();
    first_line.chars().take(MAX_TITLE_CHARS).collect()
}

/// Normalize a model-proposed title
fn clean_title(raw: &str) -> String {
    let title = truncate_title(raw.trim());
    title
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim_end_matches('.')
        .trim()
        .to_owned()
}
