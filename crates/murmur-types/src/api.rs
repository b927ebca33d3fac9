use serde::{Deserialize, Serialize};

use crate::models::{ContentType, Message};

// -- Persistence responses --

/// Result body shared by every persistence call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistResponse {
    pub fn ok(message: Option<Message>) -> Self {
        Self {
            success: true,
            message,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub content_type: ContentType,
    /// Sent so the storage side can collect blobs referenced by image/video rows.
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message already held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

// -- Reactions --

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub user_id: String,
    pub emoji: String,
}
