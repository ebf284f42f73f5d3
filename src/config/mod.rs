// ABOUTME: Configuration management module for server settings loaded from the environment
// ABOUTME: Groups database, generation, bus, and provider settings under ServerConfig
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! Configuration module for Chatloom
//!
//! All configuration comes from environment variables; there is no config file.

/// Database URL parsing and connection settings
pub mod database;
/// Environment-driven server configuration
pub mod environment;

pub use database::{DatabaseConfig, DatabaseUrl};
pub use environment::{
    BusConfig, GenerationConfig, HostedLlmConfig, OllamaConfig, OllamaTransport, ServerConfig,
};
