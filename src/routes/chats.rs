// ABOUTME: Chat route handlers for chat CRUD, message listing, sending, and transcripts
// ABOUTME: Thin axum handlers delegating to the generation pipeline and database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! Chat routes
//!
//! A send without an explicit parent is attached to the end of the displayed
//! branch, following the client's choices when it sends them. Only the first
//! message of an empty chat becomes a root.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{Chat, Message, NewChat};
use crate::resources::ServerResources;
use crate::tree::{build_tree, BranchChoices, TreeError};

/// Sender name used when a request does not name one
const DEFAULT_SENDER_NAME: &str = "User";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a chat
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// Chat settings
    #[serde(flatten)]
    pub chat: NewChat,
    /// Optional first message, sent as the chat's root
    #[serde(default)]
    pub first_message: Option<String>,
    /// Display name of the author of the first message
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Request to rename a chat
#[derive(Debug, Deserialize)]
pub struct RenameChatRequest {
    /// New title
    pub title: String,
}

/// Response listing chats
#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    /// Chats, most recent first
    pub chats: Vec<Chat>,
}

/// Request to send a message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Message text
    pub text: String,
    /// Explicit parent; takes precedence over `choices`
    #[serde(default)]
    pub parent_id: Option<i64>,
    /// Branch choices of the sending client; missing means the first child everywhere
    #[serde(default)]
    pub choices: Option<BranchChoices>,
    /// Display name of the author
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Response listing messages
#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    /// Every message in the chat, oldest first
    pub messages: Vec<Message>,
}

/// Request for the displayed transcript under a set of choices
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptRequest {
    /// Branch choices; missing entries select the first child
    #[serde(default)]
    pub choices: BranchChoices,
}

/// Transcript along the chosen branch
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    /// Choices with every entry filled in and in range
    pub choices: BranchChoices,
    /// Messages root first
    pub messages: Vec<Message>,
}

// ============================================================================
// Routes
// ============================================================================

/// Chat routes implementation
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/api/chats",
                post(Self::create_chat).get(Self::list_chats),
            )
            .route(
                "/api/chats/:chat_id",
                get(Self::get_chat)
                    .put(Self::rename_chat)
                    .delete(Self::delete_chat),
            )
            .route(
                "/api/chats/:chat_id/messages",
                get(Self::list_messages).post(Self::send_message),
            )
            .route(
                "/api/chats/:chat_id/transcript",
                post(Self::transcript),
            )
            .with_state(resources)
    }

    async fn create_chat(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<CreateChatRequest>,
    ) -> Result<Response, AppError> {
        let first_message = request
            .first_message
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty());
        let sender_name = request
            .sender_name
            .as_deref()
            .unwrap_or(DEFAULT_SENDER_NAME);

        let created = resources
            .pipeline
            .create_chat(request.chat, first_message, sender_name)
            .await?;

        Ok((StatusCode::CREATED, Json(created)).into_response())
    }

    async fn list_chats(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let chats = resources.database.list_chats().await?;
        Ok((StatusCode::OK, Json(ChatListResponse { chats })).into_response())
    }

    async fn get_chat(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
    ) -> Result<Response, AppError> {
        let chat = resources
            .database
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Chat {chat_id}")))?;

        Ok((StatusCode::OK, Json(chat)).into_response())
    }

    async fn rename_chat(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
        Json(request): Json<RenameChatRequest>,
    ) -> Result<Response, AppError> {
        let chat = resources
            .pipeline
            .rename_chat(chat_id, &request.title)
            .await?;
        Ok((StatusCode::OK, Json(chat)).into_response())
    }

    async fn delete_chat(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
    ) -> Result<Response, AppError> {
        resources.pipeline.delete_chat(chat_id).await?;
        Ok((StatusCode::NO_CONTENT, ()).into_response())
    }

    async fn list_messages(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
    ) -> Result<Response, AppError> {
        require_chat(&resources, chat_id).await?;
        let messages = resources.database.list_messages(chat_id).await?;
        Ok((StatusCode::OK, Json(MessageListResponse { messages })).into_response())
    }

    async fn send_message(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
        Json(request): Json<SendMessageRequest>,
    ) -> Result<Response, AppError> {
        if request.text.trim().is_empty() {
            return Err(AppError::missing_field("text"));
        }

        let parent_id = match request.parent_id {
            Some(parent_id) => Some(parent_id),
            None => {
                let choices = request.choices.unwrap_or_default();
                branch_tip(&resources, chat_id, &choices).await?
            }
        };

        let sent = resources
            .pipeline
            .send_message(
                chat_id,
                parent_id,
                &request.text,
                request
                    .sender_name
                    .as_deref()
                    .unwrap_or(DEFAULT_SENDER_NAME),
            )
            .await?;

        Ok((StatusCode::CREATED, Json(sent)).into_response())
    }

    async fn transcript(
        State(resources): State<Arc<ServerResources>>,
        Path(chat_id): Path<i64>,
        Json(request): Json<TranscriptRequest>,
    ) -> Result<Response, AppError> {
        require_chat(&resources, chat_id).await?;
        let messages = resources.database.list_messages(chat_id).await?;

        let response = match build_tree(messages) {
            Ok(tree) => {
                let choices = tree.normalize_choices(&request.choices);
                let messages = tree
                    .linear_transcript(&choices)
                    .into_iter()
                    .cloned()
                    .collect();
                TranscriptResponse { choices, messages }
            }
            Err(TreeError::NoRoot) => TranscriptResponse {
                choices: BranchChoices::new(),
                messages: Vec::new(),
            },
        };

        Ok((StatusCode::OK, Json(response)).into_response())
    }
}

async fn require_chat(resources: &ServerResources, chat_id: i64) -> AppResult<Chat> {
    resources
        .database
        .get_chat(chat_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Chat {chat_id}")))
}

/// Last message of the branch the client is looking at; `None` for an empty chat
async fn branch_tip(
    resources: &ServerResources,
    chat_id: i64,
    choices: &BranchChoices,
) -> AppResult<Option<i64>> {
    let messages = resources.database.list_messages(chat_id).await?;
    match build_tree(messages) {
        Ok(tree) => {
            let tip = tree.last_message(choices).map(|node| node.id());
            debug!(chat_id, tip = ?tip, "Resolved branch tip");
            Ok(tip)
        }
        Err(TreeError::NoRoot) => Ok(None),
    }
}
