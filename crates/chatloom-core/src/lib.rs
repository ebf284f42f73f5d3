// ABOUTME: Core types for the Chatloom branching chat server
// ABOUTME: Foundation crate with error handling, message models, the branch tree, and wire protocols
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![deny(unsafe_code)]

//! # Chatloom Core
//!
//! Foundation crate providing shared types for the Chatloom server. Nothing in
//! here performs I/O: the tree model is a pure function of a message snapshot,
//! and the two wire protocols are plain serde enums.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError` and `ErrorCode`
//! - **models**: Persisted `Message` and `Chat` records
//! - **tree**: Conversation forest reconstruction and branch-choice walking
//! - **events**: Subscription events fanned out to connected clients
//! - **tunnel**: Request tunnel wire protocol
//! - **constants**: Defaults shared by the server and the tunnel client

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Defaults and limits organized by domain
pub mod constants;

/// Persisted data models (`Message`, `Chat`, `Sender`)
pub mod models;

/// Message tree reconstruction and branch selection
pub mod tree;

/// Real-time subscription events
pub mod events;

/// Request tunnel wire protocol
pub mod tunnel;
