// ABOUTME: Environment-based configuration for the server, generation pipeline, and providers
// ABOUTME: Reads env vars with typed parsing and sensible defaults for local development
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::database::{DatabaseConfig, DatabaseUrl};
use crate::constants::{bus, generation, ports, providers};
use crate::errors::{AppError, AppResult};

/// How the server reaches the local Ollama instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OllamaTransport {
    /// Plain HTTP from the server process
    Direct,
    /// Relayed through a connected tunnel client
    Tunnel,
}

impl FromStr for OllamaTransport {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "tunnel" => Ok(Self::Tunnel),
            other => Err(AppError::config(format!(
                "Invalid OLLAMA_TRANSPORT value '{other}' (expected direct or tunnel)"
            ))),
        }
    }
}

impl Display for OllamaTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Tunnel => f.write_str("tunnel"),
        }
    }
}

/// Generation pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Minimum spacing between emitted progress updates
    pub throttle: Duration,
    /// Delay before the completion event is re-broadcast
    pub settle_delay: Duration,
    /// Whether new chats get a summarized title
    pub summarize_titles: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(generation::PROGRESS_THROTTLE_MS),
            settle_delay: Duration::from_millis(generation::SETTLE_DELAY_MS),
            summarize_titles: true,
        }
    }
}

impl GenerationConfig {
    /// Load generation settings from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            throttle: Duration::from_millis(parse_env(
                "GENERATION_THROTTLE_MS",
                generation::PROGRESS_THROTTLE_MS,
            )?),
            settle_delay: Duration::from_millis(parse_env(
                "GENERATION_SETTLE_DELAY_MS",
                generation::SETTLE_DELAY_MS,
            )?),
            summarize_titles: parse_env("TITLE_SUMMARY_ENABLED", true)?,
        })
    }
}

/// Broadcast bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Interval between heartbeat events
    pub heartbeat_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(bus::HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl BusConfig {
    /// Load bus settings from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        let secs = parse_env("BUS_HEARTBEAT_INTERVAL_SECS", bus::HEARTBEAT_INTERVAL_SECS)?;
        if secs == 0 {
            return Err(AppError::config(
                "BUS_HEARTBEAT_INTERVAL_SECS must be greater than zero",
            ));
        }
        Ok(Self {
            heartbeat_interval: Duration::from_secs(secs),
        })
    }
}

/// Local Ollama provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Whether the provider is registered at all
    pub enabled: bool,
    /// Base URL of the Ollama API as seen from wherever the request runs
    pub base_url: String,
    /// Direct HTTP or tunnel relay
    pub transport: OllamaTransport,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: providers::OLLAMA_DEFAULT_BASE_URL.to_owned(),
            transport: OllamaTransport::Direct,
        }
    }
}

impl OllamaConfig {
    /// Load Ollama settings from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            enabled: parse_env("OLLAMA_ENABLED", true)?,
            base_url: env_var_or("OLLAMA_BASE_URL", providers::OLLAMA_DEFAULT_BASE_URL),
            transport: env_var_or("OLLAMA_TRANSPORT", "direct").parse()?,
        })
    }
}

/// Hosted OpenAI-compatible provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedLlmConfig {
    /// Provider identifier exposed to clients
    pub provider_id: String,
    /// Base URL including the version prefix
    pub base_url: String,
    /// Bearer token; the provider is disabled without one
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Models offered to clients
    pub models: Vec<String>,
    /// Retries of empty or transport-failed completions
    pub max_retries: u32,
    /// Fixed delay between retries
    pub retry_delay: Duration,
}

impl Default for HostedLlmConfig {
    fn default() -> Self {
        Self {
            provider_id: providers::HOSTED_PROVIDER_ID.to_owned(),
            base_url: providers::HOSTED_DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            models: Vec::new(),
            max_retries: providers::HOSTED_MAX_RETRIES,
            retry_delay: Duration::from_millis(providers::HOSTED_RETRY_DELAY_MS),
        }
    }
}

impl HostedLlmConfig {
    /// Load hosted provider settings from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            provider_id: env_var_or("HOSTED_LLM_PROVIDER_ID", providers::HOSTED_PROVIDER_ID),
            base_url: env_var_or("HOSTED_LLM_BASE_URL", providers::HOSTED_DEFAULT_BASE_URL),
            api_key: env::var("HOSTED_LLM_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            models: parse_list(&env_var_or("HOSTED_LLM_MODELS", "")),
            max_retries: parse_env("HOSTED_LLM_MAX_RETRIES", providers::HOSTED_MAX_RETRIES)?,
            retry_delay: Duration::from_millis(parse_env(
                "HOSTED_LLM_RETRY_DELAY_MS",
                providers::HOSTED_RETRY_DELAY_MS,
            )?),
        })
    }
}

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Comma-separated CORS origins, `*` for any
    pub cors_allowed_origins: String,
    /// Database settings
    pub database: DatabaseConfig,
    /// Generation pipeline settings
    pub generation: GenerationConfig,
    /// Broadcast bus settings
    pub bus: BusConfig,
    /// Local Ollama provider
    pub ollama: OllamaConfig,
    /// Hosted OpenAI-compatible provider
    pub hosted: HostedLlmConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: ports::DEFAULT_HTTP_PORT,
            cors_allowed_origins: "*".to_owned(),
            database: DatabaseConfig::default(),
            generation: GenerationConfig::default(),
            bus: BusConfig::default(),
            ollama: OllamaConfig::default(),
            hosted: HostedLlmConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but invalid
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");

        Ok(Self {
            http_port: parse_env("HTTP_PORT", ports::DEFAULT_HTTP_PORT)?,
            cors_allowed_origins: env_var_or("CORS_ALLOWED_ORIGINS", "*"),
            database: DatabaseConfig {
                url: DatabaseUrl::parse_url(&env_var_or(
                    "DATABASE_URL",
                    &DatabaseUrl::default().to_connection_string(),
                ))?,
            },
            generation: GenerationConfig::from_env()?,
            bus: BusConfig::from_env()?,
            ollama: OllamaConfig::from_env()?,
            hosted: HostedLlmConfig::from_env()?,
        })
    }

    /// One-line-per-setting summary for the startup log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Chatloom Configuration:\n\
             - HTTP Port: {}\n\
             - Database: {}\n\
             - Progress Throttle: {}ms\n\
             - Heartbeat: {}s\n\
             - Ollama: {} ({}, {})\n\
             - Hosted LLM: {} ({} models)",
            self.http_port,
            self.database.url,
            self.generation.throttle.as_millis(),
            self.bus.heartbeat_interval.as_secs(),
            if self.ollama.enabled {
                "Enabled"
            } else {
                "Disabled"
            },
            self.ollama.transport,
            self.ollama.base_url,
            if self.hosted.api_key.is_some() {
                "Enabled"
            } else {
                "Disabled"
            },
            self.hosted.models.len(),
        )
    }
}

/// Read an env var, falling back to a default
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Read and parse an env var, falling back to a default when unset
fn parse_env<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value '{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
