// ABOUTME: Message route handlers for regenerating, duplicating, editing, and deleting messages
// ABOUTME: Every mutation goes through the generation pipeline so tree invariants hold
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Message;
use crate::resources::ServerResources;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to edit a message
#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    /// Replacement text
    pub text: String,
    /// Branch a user message instead of editing in place
    #[serde(default)]
    pub regenerate: bool,
}

/// Response to a subtree deletion
#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    /// Every removed message, oldest first
    pub deleted: Vec<Message>,
}

// ============================================================================
// Routes
// ============================================================================

/// Message routes implementation
pub struct MessageRoutes;

impl MessageRoutes {
    /// Create all message routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/api/messages/:message_id",
                put(Self::edit_message).delete(Self::delete_message),
            )
            .route(
                "/api/messages/:message_id/regenerate",
                post(Self::regenerate),
            )
            .route("/api/messages/:message_id/retry", post(Self::retry))
            .route(
                "/api/messages/:message_id/duplicate",
                post(Self::duplicate),
            )
            .with_state(resources)
    }

    /// New assistant reply under the given user message
    async fn regenerate(
        State(resources): State<Arc<ServerResources>>,
        Path(message_id): Path<i64>,
    ) -> Result<Response, AppError> {
        let message = resources.pipeline.regenerate(message_id).await?;
        Ok((StatusCode::CREATED, Json(message)).into_response())
    }

    /// New sibling of the given assistant message
    async fn retry(
        State(resources): State<Arc<ServerResources>>,
        Path(message_id): Path<i64>,
    ) -> Result<Response, AppError> {
        let message = resources.pipeline.regenerate_message(message_id).await?;
        Ok((StatusCode::CREATED, Json(message)).into_response())
    }

    async fn duplicate(
        State(resources): State<Arc<ServerResources>>,
        Path(message_id): Path<i64>,
    ) -> Result<Response, AppError> {
        let message = resources.pipeline.duplicate(message_id).await?;
        Ok((StatusCode::CREATED, Json(message)).into_response())
    }

    async fn edit_message(
        State(resources): State<Arc<ServerResources>>,
        Path(message_id): Path<i64>,
        Json(request): Json<EditMessageRequest>,
    ) -> Result<Response, AppError> {
        if request.regenerate && request.text.trim().is_empty() {
            return Err(AppError::missing_field("text"));
        }

        let outcome = resources
            .pipeline
            .edit(message_id, &request.text, request.regenerate)
            .await?;
        Ok((StatusCode::OK, Json(outcome)).into_response())
    }

    async fn delete_message(
        State(resources): State<Arc<ServerResources>>,
        Path(message_id): Path<i64>,
    ) -> Result<Response, AppError> {
        let deleted = resources.pipeline.delete_message(message_id).await?;
        Ok((StatusCode::OK, Json(DeleteMessageResponse { deleted })).into_response())
    }
}
