//! Request/response persistence collaborator.
//!
//! Each call is independently fallible and carries no timeout; a response
//! arriving after its room was closed is dropped by the room guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use murmur_types::api::PersistResponse;
use murmur_types::{ContentType, Message};

use crate::error::{Result, SyncError};

#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    async fn insert_message(&self, message: &Message) -> Result<PersistResponse>;

    async fn edit_message(&self, id: &str, content: &str) -> Result<PersistResponse>;

    /// `content` is passed along so image/video blobs can be collected.
    async fn delete_message(
        &self,
        id: &str,
        content_type: ContentType,
        content: &str,
    ) -> Result<PersistResponse>;

    async fn add_reaction(&self, id: &str, user_id: &str, emoji: &str) -> Result<PersistResponse>;

    async fn remove_reaction(&self, id: &str, user_id: &str, emoji: &str) -> Result<PersistResponse>;

    /// Up to `limit` messages older than `before`, in any order.
    async fn fetch_history(
        &self,
        room_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>>;
}

pub trait PersistResponseExt {
    /// `success == false` becomes [`SyncError::Backend`].
    fn into_result(self) -> Result<Option<Message>>;
}

impl PersistResponseExt for PersistResponse {
    fn into_result(self) -> Result<Option<Message>> {
        if self.success {
            Ok(self.message)
        } else {
            Err(SyncError::Backend(
                self.error.unwrap_or_else(|| "request rejected".to_string()),
            ))
        }
    }
}
