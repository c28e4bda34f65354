use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::identity::Identity,
    models::message::{ChatMessage, MessageType},
};

/// The number of history entries returned per read.
pub const HISTORY_LIMIT: i64 = 50;

fn row_to_message(row: &Row) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
        session_id: row.try_get("session_id").map_err(|_| AppError::MissingData("session_id".to_string()))?,
        message_type: row.try_get("message_type").map_err(|_| AppError::MissingData("message_type".to_string()))?,
        content: row.try_get("content").map_err(|_| AppError::MissingData("content".to_string()))?,
        file_data: row.try_get("file_data").map_err(|_| AppError::MissingData("file_data".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
    })
}

fn identity_columns(identity: &Identity) -> (Option<Uuid>, Option<Uuid>) {
    match identity {
        Identity::User(user) => (Some(user.id), None),
        Identity::Anonymous(session_id) => (None, Some(*session_id)),
    }
}

/// Inserts a message owned by the given identity.
pub async fn insert(
    pool: &Pool,
    identity: &Identity,
    message_type: MessageType,
    content: &str,
    file_data: Option<&serde_json::Value>,
) -> Result<ChatMessage> {
    let (user_id, session_id) = identity_columns(identity);
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO chat_messages (user_id, session_id, message_type, content, file_data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
            &[&user_id, &session_id, &message_type, &content, &file_data],
        )
        .await?;
    row_to_message(&row)
}

/// Fetches the newest messages for an identity, oldest-first.
pub async fn history(pool: &Pool, identity: &Identity) -> Result<Vec<ChatMessage>> {
    let client = pool.get().await?;
    let rows = match identity {
        Identity::User(user) => {
            client
                .query(
                    r#"
                    SELECT *
                    FROM chat_messages
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                    &[&user.id, &HISTORY_LIMIT],
                )
                .await?
        }
        Identity::Anonymous(session_id) => {
            client
                .query(
                    r#"
                    SELECT *
                    FROM chat_messages
                    WHERE session_id = $1 AND user_id IS NULL
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                    &[session_id, &HISTORY_LIMIT],
                )
                .await?
        }
    };

    let mut messages: Vec<ChatMessage> = rows.iter().map(row_to_message).collect::<Result<_>>()?;
    messages.reverse();
    Ok(messages)
}

/// Deletes all messages owned by an identity. Returns the row count.
pub async fn clear(pool: &Pool, identity: &Identity) -> Result<u64> {
    let client = pool.get().await?;
    let deleted = match identity {
        Identity::User(user) => {
            client
                .execute("DELETE FROM chat_messages WHERE user_id = $1", &[&user.id])
                .await?
        }
        Identity::Anonymous(session_id) => {
            client
                .execute(
                    "DELETE FROM chat_messages WHERE session_id = $1 AND user_id IS NULL",
                    &[session_id],
                )
                .await?
        }
    };
    Ok(deleted)
}

/// Deletes anonymous messages older than the retention window. Run from the
/// background cleanup job.
pub async fn purge_stale_anonymous(pool: &Pool, retention_days: i32) -> Result<u64> {
    let client = pool.get().await?;
    let deleted = client
        .execute(
            r#"
            DELETE FROM chat_messages
            WHERE user_id IS NULL
              AND created_at < NOW() - ($1::int * INTERVAL '1 day')
            "#,
            &[&retention_days],
        )
        .await?;
    Ok(deleted)
}
