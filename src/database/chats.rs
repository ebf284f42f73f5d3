// ABOUTME: Chat row operations: create, list, lookup, rename, and delete
// ABOUTME: Deleting a chat cascades to all of its messages through the foreign key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{now_millis, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Chat, NewChat};

const CHAT_COLUMNS: &str = "id, title, provider_id, model_id, system_prompt, temperature, created_at";

fn chat_from_row(row: &SqliteRow) -> AppResult<Chat> {
    let temperature: Option<f64> = row.try_get("temperature")?;
    Ok(Chat {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        provider_id: row.try_get("provider_id")?,
        model_id: row.try_get("model_id")?,
        system_prompt: row.try_get("system_prompt")?,
        temperature: temperature.map(|t| t as f32),
        created_at: row.try_get("created_at")?,
    })
}

impl Database {
    /// Create a chat
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn create_chat(&self, new: &NewChat) -> AppResult<Chat> {
        let sql = format!(
            "INSERT INTO chats (title, provider_id, model_id, system_prompt, temperature, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING {CHAT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&new.title)
            .bind(&new.provider_id)
            .bind(&new.model_id)
            .bind(new.system_prompt.as_deref())
            .bind(new.temperature.map(f64::from))
            .bind(now_millis())
            .fetch_one(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

        chat_from_row(&row)
    }

    /// Get a chat by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_chat(&self, chat_id: i64) -> AppResult<Option<Chat>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get chat {chat_id}: {e}")))?;

        row.as_ref().map(chat_from_row).transpose()
    }

    /// All chats, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn list_chats(&self) -> AppResult<Vec<Chat>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to list chats: {e}")))?;

        rows.iter().map(chat_from_row).collect()
    }

    /// Change a chat's title; returns false when the chat does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn rename_chat(&self, chat_id: i64, title: &str) -> AppResult<bool> {
        let result = sqlx::query("UPDATE chats SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(chat_id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to rename chat {chat_id}: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a chat and its messages; returns false when the chat does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn delete_chat(&self, chat_id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(chat_id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to delete chat {chat_id}: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
