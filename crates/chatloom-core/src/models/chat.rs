// ABOUTME: Chat record with the provider and model every generation in it uses
// ABOUTME: Titles may be rewritten asynchronously by summarization
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use serde::{Deserialize, Serialize};

/// A conversation container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Row id
    pub id: i64,
    /// Display title
    pub title: String,
    /// Provider used for generations
    pub provider_id: String,
    /// Model used for generations
    pub model_id: String,
    /// Optional system prompt prepended to every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Optional sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Creation time, UTC milliseconds
    pub created_at: i64,
}

/// Fields needed to insert a chat
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    /// Display title; a default is chosen when empty
    #[serde(default)]
    pub title: String,
    /// Provider used for generations
    pub provider_id: String,
    /// Model used for generations
    pub model_id: String,
    /// Optional system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Optional sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}
