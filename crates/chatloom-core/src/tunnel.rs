// ABOUTME: Wire protocol for multiplexing HTTP request/response pairs over one WebSocket
// ABOUTME: JSON text frames tagged by "type"; response body chunks travel base64-encoded
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Request Tunnel Protocol
//!
//! The server sends `request` frames; the client answers each one, correlated by
//! `id`, either with a streaming sequence (`response-init`, any number of
//! `response-chunk`, then `response`) or with a single `response` or `error`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Header map carried by tunnel frames
pub type TunnelHeaders = BTreeMap<String, String>;

/// A tunnel frame in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TunnelMessage {
    /// Server to client: perform this HTTP request
    #[serde(rename = "request")]
    Request {
        /// Correlation id
        id: String,
        /// HTTP method
        method: String,
        /// Absolute target URL
        url: String,
        /// Request headers
        #[serde(default)]
        headers: TunnelHeaders,
        /// Request body
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    /// Client to server: status and headers are known, body follows
    #[serde(rename = "response-init", rename_all = "camelCase")]
    ResponseInit {
        /// Correlation id
        id: String,
        /// Response headers
        #[serde(default)]
        headers: TunnelHeaders,
        /// HTTP status
        status_code: u16,
    },
    /// Client to server: one piece of the response body
    #[serde(rename = "response-chunk")]
    ResponseChunk {
        /// Correlation id
        id: String,
        /// Base64-encoded bytes
        chunk: String,
    },
    /// Client to server: response finished
    ///
    /// Closes the body stream when a `response-init` preceded it; otherwise it is
    /// the complete response.
    #[serde(rename = "response", rename_all = "camelCase")]
    Response {
        /// Correlation id
        id: String,
        /// Full body text
        #[serde(default)]
        body: String,
        /// Response headers
        #[serde(default)]
        headers: TunnelHeaders,
        /// HTTP status
        #[serde(default)]
        status_code: u16,
    },
    /// Client to server: the request failed
    #[serde(rename = "error")]
    Error {
        /// Correlation id
        id: String,
        /// Failure text
        error: String,
    },
    /// Any tag this build does not know; ignored
    #[serde(other)]
    Unknown,
}

impl TunnelMessage {
    /// Correlation id, if the frame carries one
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Request { id, .. }
            | Self::ResponseInit { id, .. }
            | Self::ResponseChunk { id, .. }
            | Self::Response { id, .. }
            | Self::Error { id, .. } => Some(id),
            Self::Unknown => None,
        }
    }

    /// Body chunk frame with the bytes base64-encoded
    #[must_use]
    pub fn chunk(id: impl Into<String>, bytes: &[u8]) -> Self {
        Self::ResponseChunk {
            id: id.into(),
            chunk: STANDARD.encode(bytes),
        }
    }

    /// Error frame
    #[must_use]
    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            error: error.into(),
        }
    }
}

/// Decode the payload of a `response-chunk` frame
///
/// # Errors
///
/// Returns an error when the chunk is not valid base64.
pub fn decode_chunk(chunk: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(chunk)
}
