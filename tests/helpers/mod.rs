// ABOUTME: Shared test helpers for integration tests
// ABOUTME: Exports the in-process API client and the scripted model provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod api;
pub mod scripted_provider;
