// ABOUTME: Message row operations usable on the pool or inside a transaction
// ABOUTME: Inserts, lookups, generation-state updates, and sibling/root counts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Message, NewMessage, Sender};

/// Column list shared by every query that materializes a [`Message`]
pub(crate) const MESSAGE_COLUMNS: &str = "id, parent_id, chat_id, sender, sender_name, text, \
     is_generating, error, provider_id, model_id, created_at";

/// Decode a `messages` row
pub(crate) fn message_from_row(row: &SqliteRow) -> AppResult<Message> {
    let sender: String = row.try_get("sender")?;
    Ok(Message {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        chat_id: row.try_get("chat_id")?,
        sender: sender.parse::<Sender>()?,
        sender_name: row.try_get("sender_name")?,
        text: row.try_get("text")?,
        is_generating: row.try_get("is_generating")?,
        error: row.try_get("error")?,
        provider_id: row.try_get("provider_id")?,
        model_id: row.try_get("model_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a message and return the stored row
///
/// # Errors
///
/// Returns an error if the insert fails (for example a dangling parent id)
pub async fn insert_message<'e, E>(executor: E, new: &NewMessage) -> AppResult<Message>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT INTO messages (chat_id, parent_id, sender, sender_name, text, is_generating, \
         provider_id, model_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         RETURNING {MESSAGE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(new.chat_id)
        .bind(new.parent_id)
        .bind(new.sender.as_str())
        .bind(&new.sender_name)
        .bind(&new.text)
        .bind(new.is_generating)
        .bind(new.provider_id.as_deref())
        .bind(new.model_id.as_deref())
        .bind(new.created_at)
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::database(format!("Failed to insert message: {e}")))?;

    message_from_row(&row)
}

/// Fetch a single message
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn fetch_message<'e, E>(executor: E, message_id: i64) -> AppResult<Option<Message>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(message_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::database(format!("Failed to get message {message_id}: {e}")))?;

    row.as_ref().map(message_from_row).transpose()
}

/// Newest `created_at` in a chat
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn latest_timestamp<'e, E>(executor: E, chat_id: i64) -> AppResult<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(created_at) FROM messages WHERE chat_id = ?1")
        .bind(chat_id)
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::database(format!("Failed to read latest timestamp: {e}")))
}

/// Number of root messages in a chat
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn count_roots<'e, E>(executor: E, chat_id: i64) -> AppResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND parent_id IS NULL")
        .bind(chat_id)
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::database(format!("Failed to count root messages: {e}")))
}

/// Number of direct children of a message
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn count_children<'e, E>(executor: E, parent_id: i64) -> AppResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE parent_id = ?1")
        .bind(parent_id)
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::database(format!("Failed to count child messages: {e}")))
}

impl Database {
    /// Get a message by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_message(&self, message_id: i64) -> AppResult<Option<Message>> {
        fetch_message(self.pool(), message_id).await
    }

    /// All messages of a chat, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn list_messages(&self, chat_id: i64) -> AppResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to list messages: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    /// Store partial generation output
    ///
    /// Returns false when the row no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn record_progress(&self, message_id: i64, text: &str) -> AppResult<bool> {
        self.write_generation_state(message_id, text, true, None)
            .await
    }

    /// Store the final generation output and clear any error
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn complete_generation(&self, message_id: i64, text: &str) -> AppResult<bool> {
        self.write_generation_state(message_id, text, false, None)
            .await
    }

    /// Mark a generation as failed, clearing its text
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn fail_generation(&self, message_id: i64, error: &str) -> AppResult<bool> {
        self.write_generation_state(message_id, "", false, Some(error))
            .await
    }

    async fn write_generation_state(
        &self,
        message_id: i64,
        text: &str,
        is_generating: bool,
        error: Option<&str>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET text = ?1, is_generating = ?2, error = ?3 WHERE id = ?4",
        )
        .bind(text)
        .bind(is_generating)
        .bind(error)
        .bind(message_id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to update message {message_id}: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a finished message's text in place
    ///
    /// Returns false when the row is missing or a generation still owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn update_message_text(&self, message_id: i64, text: &str) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE messages SET text = ?1 WHERE id = ?2 AND is_generating = 0")
            .bind(text)
            .bind(message_id)
            .execute(self.pool())
            .await
            .map_err(|e| {
                AppError::database(format!("Failed to edit message {message_id}: {e}"))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
