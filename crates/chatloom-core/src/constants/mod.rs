// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Default timings, ports, and endpoint paths shared by server and tunnel client
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! Constants module
//!
//! Constants are grouped into small domain modules rather than one flat list.

/// API endpoints
pub mod endpoints {
    /// Health check endpoint
    pub const HEALTH_CHECK: &str = "/health";
    /// API base path
    pub const API_BASE: &str = "/api";
    /// Server-sent events subscription endpoint
    pub const EVENTS: &str = "/api/events";
    /// WebSocket subscription endpoint
    pub const SOCKET: &str = "/api/ws";
    /// Request tunnel upgrade endpoint
    pub const TUNNEL: &str = "/api/tunnel";
}

/// Network ports
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}

/// Generation pipeline timings
pub mod generation {
    /// Minimum spacing between emitted progress updates (milliseconds)
    pub const PROGRESS_THROTTLE_MS: u64 = 100;
    /// Delay before the completion event is re-broadcast (milliseconds)
    pub const SETTLE_DELAY_MS: u64 = 1000;
    /// Sender name recorded on assistant messages when the model has no label
    pub const DEFAULT_AI_SENDER_NAME: &str = "Assistant";
    /// Maximum characters kept from a summarized chat title
    pub const MAX_TITLE_CHARS: usize = 80;
    /// Title given to chats before summarization renames them
    pub const DEFAULT_CHAT_TITLE: &str = "New chat";
}

/// Broadcast bus timings
pub mod bus {
    /// Heartbeat interval for subscription channels (seconds)
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;
}

/// Provider defaults
pub mod providers {
    /// Identifier of the local Ollama provider
    pub const OLLAMA_PROVIDER_ID: &str = "ollama";
    /// Default Ollama base URL
    pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";
    /// Identifier of the hosted OpenAI-compatible provider
    pub const HOSTED_PROVIDER_ID: &str = "hosted";
    /// Default hosted base URL
    pub const HOSTED_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
    /// Default number of retries for empty or failed hosted completions
    pub const HOSTED_MAX_RETRIES: u32 = 3;
    /// Fixed delay between hosted retries (milliseconds)
    pub const HOSTED_RETRY_DELAY_MS: u64 = 1000;
}

/// Request tunnel timings
pub mod tunnel {
    /// Delay before the tunnel client reconnects after a socket error (milliseconds)
    pub const RECONNECT_DELAY_MS: u64 = 3000;
}
