// ABOUTME: SQLite storage for chats and branching messages
// ABOUTME: Owns the connection pool, runs idempotent migrations, and exposes CRUD operations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Database Management
//!
//! Chats and messages live in two tables. Messages reference their parent
//! message, so a chat's messages form a forest; the recursive traversals live in
//! [`history`]. Functions that must run inside a transaction take a generic
//! `sqlx::Executor` so callers can pass either the pool or `&mut *tx`.

mod chats;
pub mod history;
pub mod messages;

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::config::DatabaseUrl;
use crate::errors::{AppError, AppResult};

/// Current time as UTC milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Timestamp for a new message in a chat whose newest message has `latest`
///
/// Strictly greater than `latest`, so insertion order and chronological order
/// agree even when the wall clock stalls or steps backwards.
#[must_use]
pub fn next_timestamp(latest: Option<i64>) -> i64 {
    let now = now_millis();
    latest.map_or(now, |latest| now.max(latest + 1))
}

/// Database manager for chat and message storage
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    ///
    /// In-memory databases are pinned to a single long-lived connection; every
    /// new `SQLite` connection to `:memory:` would otherwise see an empty database.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails, or a
    /// migration fails
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let url = DatabaseUrl::parse_url(database_url)?;

        if let DatabaseUrl::SQLite { path } = &url {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::database(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&url.to_connection_string())
            .map_err(|e| AppError::database(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if url.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to {url}: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        info!(database = %url, "Database ready");

        Ok(db)
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a write transaction
    ///
    /// Takes the write lock up front. A transaction that reads and then writes
    /// waits out the busy timeout behind other writers instead of failing
    /// with `SQLITE_BUSY` on its first write.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be acquired
    pub async fn begin(&self) -> AppResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))
    }

    /// Create tables and indexes if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_chats().await?;
        self.migrate_messages().await?;
        debug!("Database migrations applied");
        Ok(())
    }

    async fn migrate_chats(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                system_prompt TEXT,
                temperature REAL,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chats table: {e}")))?;

        Ok(())
    }

    async fn migrate_messages(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                parent_id INTEGER REFERENCES messages(id) ON DELETE CASCADE,
                sender TEXT NOT NULL CHECK (sender IN ('user', 'ai')),
                sender_name TEXT NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                is_generating INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                provider_id TEXT,
                model_id TEXT,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create messages table: {e}")))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_created ON messages(chat_id, created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to create index: {e}")))?;
        }

        Ok(())
    }
}
