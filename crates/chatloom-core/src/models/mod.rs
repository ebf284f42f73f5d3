// ABOUTME: Persisted data models for chats and messages
// ABOUTME: Re-exports Message, Sender, Chat and the constructors used by the storage layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Data Models
//!
//! Records as they are stored and as they travel to clients. JSON field names are
//! camelCase; timestamps are UTC milliseconds since the Unix epoch.

mod chat;
mod message;

pub use chat::{Chat, NewChat};
pub use message::{Message, NewMessage, Sender};
