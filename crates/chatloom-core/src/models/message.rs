// ABOUTME: Message record with parent link, sender kind, and generation status fields
// ABOUTME: Messages form a forest per chat through nullable parent ids
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Typed by a person
    User,
    /// Produced by a model provider
    Ai,
}

impl Sender {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "ai" => Ok(Self::Ai),
            other => Err(AppError::invalid_input(format!(
                "Unknown message sender: {other}"
            ))),
        }
    }
}

/// A single message in a chat
///
/// A `user` message has a null parent (it is a root) or a parent in the same
/// chat. An `ai` message always has a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Monotonic row id
    pub id: i64,
    /// Parent message, `None` for roots
    pub parent_id: Option<i64>,
    /// Owning chat
    pub chat_id: i64,
    /// Author kind
    pub sender: Sender,
    /// Display name of the author
    pub sender_name: String,
    /// Current text; grows while generating
    pub text: String,
    /// Whether a generation currently owns this message
    pub is_generating: bool,
    /// Failure text for failed generations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider that produced an `ai` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Model that produced an `ai` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Creation time, UTC milliseconds
    pub created_at: i64,
}

impl Message {
    /// Whether the message has no parent
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Sort key used everywhere messages are ordered
    #[must_use]
    pub const fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.id)
    }
}

/// Fields needed to insert a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning chat
    pub chat_id: i64,
    /// Parent message, `None` for roots
    pub parent_id: Option<i64>,
    /// Author kind
    pub sender: Sender,
    /// Display name of the author
    pub sender_name: String,
    /// Initial text
    pub text: String,
    /// Whether a generation will own the new row
    pub is_generating: bool,
    /// Provider for `ai` rows
    pub provider_id: Option<String>,
    /// Model for `ai` rows
    pub model_id: Option<String>,
    /// Creation time, UTC milliseconds
    pub created_at: i64,
}

impl NewMessage {
    /// A user-authored message
    #[must_use]
    pub fn user(
        chat_id: i64,
        parent_id: Option<i64>,
        sender_name: impl Into<String>,
        text: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            chat_id,
            parent_id,
            sender: Sender::User,
            sender_name: sender_name.into(),
            text: text.into(),
            is_generating: false,
            provider_id: None,
            model_id: None,
            created_at,
        }
    }

    /// An empty assistant placeholder awaiting generation
    #[must_use]
    pub fn ai_placeholder(
        chat_id: i64,
        parent_id: i64,
        sender_name: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            chat_id,
            parent_id: Some(parent_id),
            sender: Sender::Ai,
            sender_name: sender_name.into(),
            text: String::new(),
            is_generating: true,
            provider_id: Some(provider_id.into()),
            model_id: Some(model_id.into()),
            created_at,
        }
    }
}
