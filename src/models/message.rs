use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The direction of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToSql, FromSql, Serialize, Deserialize)]
#[postgres(name = "message_type")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// An inbound message from the identity.
    #[postgres(name = "user")]
    User,
    /// An outbound reply from the assistant (or a degraded error string).
    #[postgres(name = "assistant")]
    Assistant,
}

/// A single turn of a conversation. Immutable once created; deleted only in
/// bulk when an identity clears its history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: i64,
    /// Set for authenticated identities.
    pub user_id: Option<Uuid>,
    /// Set for anonymous identities.
    pub session_id: Option<Uuid>,
    pub message_type: MessageType,
    pub content: String,
    /// File attachment metadata, when the message carried an upload.
    pub file_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// The wire shape of a history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<serde_json::Value>,
}

impl From<ChatMessage> for HistoryEntry {
    fn from(message: ChatMessage) -> Self {
        Self {
            message_type: message.message_type,
            content: message.content,
            timestamp: message.created_at,
            file_data: message.file_data,
        }
    }
}
