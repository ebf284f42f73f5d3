// ABOUTME: Recursive ancestor and descendant traversals over the message forest
// ABOUTME: Implemented as recursive CTEs so depth is unbounded and callers can use transactions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # History Queries
//!
//! `ancestors` feeds the model its context; `descendants` finds the subtree a
//! delete removes. Both use `UNION` rather than `UNION ALL`, so an accidental
//! parent cycle terminates instead of recursing forever.

use sqlx::{Executor, Sqlite};

use super::messages::{message_from_row, MESSAGE_COLUMNS};
use crate::errors::{AppError, AppResult};
use crate::models::Message;

/// The message and every ancestor up to its root, oldest first
///
/// The last element is the message itself. An unknown id yields an empty list.
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn ancestors<'e, E>(executor: E, message_id: i64) -> AppResult<Vec<Message>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r"
        WITH RECURSIVE chain(id, parent_id) AS (
            SELECT id, parent_id FROM messages WHERE id = ?1
            UNION
            SELECT m.id, m.parent_id FROM messages m JOIN chain c ON m.id = c.parent_id
        )
        SELECT {MESSAGE_COLUMNS} FROM messages
        WHERE id IN (SELECT id FROM chain)
        ORDER BY created_at ASC, id ASC
        "
    );

    let rows = sqlx::query(&sql)
        .bind(message_id)
        .fetch_all(executor)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to load ancestors of {message_id}: {e}"))
        })?;

    rows.iter().map(message_from_row).collect()
}

/// The message and every descendant, oldest first
///
/// # Errors
///
/// Returns an error if the query fails
pub async fn descendants<'e, E>(executor: E, message_id: i64) -> AppResult<Vec<Message>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM messages WHERE id = ?1
            UNION
            SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
        )
        SELECT {MESSAGE_COLUMNS} FROM messages
        WHERE id IN (SELECT id FROM subtree)
        ORDER BY created_at ASC, id ASC
        "
    );

    let rows = sqlx::query(&sql)
        .bind(message_id)
        .fetch_all(executor)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to load descendants of {message_id}: {e}"))
        })?;

    rows.iter().map(message_from_row).collect()
}

/// Delete the message and every descendant
///
/// Returns the rows the statement deleted itself; `SQLite` does not count rows
/// removed by the `parent_id` cascade, so this can be lower than the subtree size.
///
/// # Errors
///
/// Returns an error if the delete fails
pub async fn delete_subtree<'e, E>(executor: E, message_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM messages WHERE id = ?1
            UNION
            SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
        )
        DELETE FROM messages WHERE id IN (SELECT id FROM subtree)
        ",
    )
    .bind(message_id)
    .execute(executor)
    .await
    .map_err(|e| AppError::database(format!("Failed to delete subtree of {message_id}: {e}")))?;

    Ok(result.rows_affected())
}
