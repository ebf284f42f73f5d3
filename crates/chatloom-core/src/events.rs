// ABOUTME: Subscription events fanned out to every connected browser session
// ABOUTME: Tagged union serialized with a "type" discriminator; unknown tags decode to Unknown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use serde::{Deserialize, Serialize};

/// Event delivered to subscription channels
///
/// Events are ephemeral: they are never persisted and a client that misses one
/// recovers by re-reading the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubscriptionEvent {
    /// A message's text or generation status changed
    #[serde(rename = "updateMessage", rename_all = "camelCase")]
    UpdateMessage {
        /// Changed message
        message_id: i64,
        /// Chat owning the message
        chat_id: i64,
        /// Current text
        text: String,
        /// Generation status, omitted for plain edits
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_generating: Option<bool>,
        /// Failure text when the generation failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A chat's metadata changed
    #[serde(rename = "updateChat", rename_all = "camelCase")]
    UpdateChat {
        /// Changed chat
        chat_id: i64,
        /// New title
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Keep-alive tick
    #[serde(rename = "heartbeat")]
    Heartbeat {},
    /// Any tag this build does not know
    #[serde(other)]
    Unknown,
}

impl SubscriptionEvent {
    /// Progress or completion of a generation
    #[must_use]
    pub fn generation(message_id: i64, chat_id: i64, text: String, is_generating: bool) -> Self {
        Self::UpdateMessage {
            message_id,
            chat_id,
            text,
            is_generating: Some(is_generating),
            error: None,
        }
    }

    /// Terminal failure of a generation
    #[must_use]
    pub fn generation_failed(message_id: i64, chat_id: i64, error: String) -> Self {
        Self::UpdateMessage {
            message_id,
            chat_id,
            text: String::new(),
            is_generating: Some(false),
            error: Some(error),
        }
    }

    /// In-place edit of a message's text
    #[must_use]
    pub fn edited(message_id: i64, chat_id: i64, text: String) -> Self {
        Self::UpdateMessage {
            message_id,
            chat_id,
            text,
            is_generating: None,
            error: None,
        }
    }

    /// Chat renamed
    #[must_use]
    pub fn renamed(chat_id: i64, title: String) -> Self {
        Self::UpdateChat {
            chat_id,
            title: Some(title),
        }
    }

    /// Keep-alive tick
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self::Heartbeat {}
    }
}
