// ABOUTME: HTTP middleware shared by all routes
// ABOUTME: Currently CORS configuration; request tracing comes from tower-http directly
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

/// CORS layer construction
pub mod cors;

pub use cors::setup_cors;
