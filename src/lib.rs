// ABOUTME: Main library entry point for the Chatloom branching chat server
// ABOUTME: Exposes storage, generation, fan-out, tunnel, and HTTP route modules to binaries and tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![deny(unsafe_code)]

//! # Chatloom
//!
//! A self-hosted chat server where every conversation is a tree. Each user
//! message can have several assistant replies and every message can be edited
//! into a new branch.
//!
//! ## Architecture
//!
//! - **Tree**: pure reconstruction of a chat from its flat message rows
//! - **Database**: `SQLite` storage with recursive history queries
//! - **Generation**: background provider calls streamed into placeholder rows
//! - **Bus**: fan-out of message events to SSE and WebSocket subscribers
//! - **Tunnel**: HTTP over a WebSocket so the server can reach a local model
//!   server it cannot dial directly
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chatloom::config::ServerConfig;
//! use chatloom::errors::AppResult;
//! use chatloom::resources::ServerResources;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     let resources = ServerResources::new(config).await?;
//!     println!("{} providers registered", resources.providers.len());
//!     Ok(())
//! }
//! ```

// ── Shared core types ───────────────────────────────────────────────────

pub use chatloom_core::{constants, errors, events, models, tree};

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by binary crates (src/bin/) and integration tests (tests/).

/// Broadcast bus delivering subscription events to connected clients
pub mod bus;

/// Environment-driven configuration
pub mod config;

/// `SQLite` storage for chats and messages
pub mod database;

/// Generation pipeline and progress throttling
pub mod generation;

/// Model provider abstraction and implementations
pub mod llm;

/// Structured logging setup
pub mod logging;

/// HTTP middleware
pub mod middleware;

/// Shared state injected into routes
pub mod resources;

/// HTTP routes
pub mod routes;

/// Request tunnel hub and client
pub mod tunnel;
