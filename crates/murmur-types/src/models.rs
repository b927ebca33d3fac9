use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reactions::Reactions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Link,
    VideoCall,
    System,
}

impl ContentType {
    /// Content types whose `content` is a JSON list of [`Attachment`]s.
    pub fn carries_attachments(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio | Self::File)
    }

    /// Content types whose referenced blobs the storage side collects on delete.
    pub fn owns_blobs(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

/// Local delivery state of a message. Never set on server-originated rows
/// until they are merged into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Parse an attachment-list payload.
pub fn parse_attachments(content: &str) -> Result<Vec<Attachment>, serde_json::Error> {
    serde_json::from_str(content)
}

/// What the user submits before the client turns it into an optimistic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Text,
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

/// A chat message as held by the client.
///
/// A locally created message starts with `temp_id` set and no `id`. Once the
/// backend confirms it (by response or by echo) `id` holds the server id and
/// `temp_id` is cleared. Echoes from the server carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
}

impl Message {
    /// Build the optimistic row for a local send.
    pub fn optimistic(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        temp_id: impl Into<String>,
        draft: &Draft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            temp_id: Some(temp_id.into()),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            content: draft.content.clone(),
            content_type: draft.content_type,
            created_at,
            edited: false,
            reply_to: draft.reply_to.clone(),
            reactions: Reactions::default(),
            delivery_status: Some(DeliveryStatus::Pending),
        }
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    pub fn has_temp_id(&self, temp_id: &str) -> bool {
        self.temp_id.as_deref() == Some(temp_id)
    }

    /// True while the backend has not assigned an id yet.
    pub fn is_optimistic(&self) -> bool {
        self.id.is_none()
    }

    pub fn attachments(&self) -> Result<Vec<Attachment>, serde_json::Error> {
        if self.content_type.carries_attachments() {
            parse_attachments(&self.content)
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_wire_names() {
        let json = serde_json::to_string(&ContentType::VideoCall).unwrap();
        assert_eq!(json, "\"video-call\"");
        let parsed: ContentType = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(parsed, ContentType::Image);
    }

    #[test]
    fn server_message_without_local_fields_parses() {
        let json = r#"{
            "id": "m1",
            "room_id": "r1",
            "sender_id": "u1",
            "content": "hi",
            "content_type": "text",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.has_id("m1"));
        assert!(msg.temp_id.is_none());
        assert!(msg.delivery_status.is_none());
        assert!(msg.reactions.is_empty());
        assert!(!msg.edited);
    }

    #[test]
    fn optimistic_message_is_pending() {
        let draft = Draft::text("hello").reply_to("m0");
        let msg = Message::optimistic("r1", "u1", "tmp-1", &draft, Utc::now());
        assert!(msg.is_optimistic());
        assert!(msg.has_temp_id("tmp-1"));
        assert_eq!(msg.reply_to.as_deref(), Some("m0"));
        assert_eq!(msg.delivery_status, Some(DeliveryStatus::Pending));
    }

    #[test]
    fn attachments_only_for_attachment_types() {
        let draft = Draft {
            content: r#"[{"url":"https://cdn/a.png","size":12}]"#.into(),
            content_type: ContentType::Image,
            reply_to: None,
        };
        let msg = Message::optimistic("r1", "u1", "tmp-1", &draft, Utc::now());
        let files = msg.attachments().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, Some(12));

        let text = Message::optimistic("r1", "u1", "tmp-2", &Draft::text("[oops"), Utc::now());
        assert!(text.attachments().unwrap().is_empty());
    }
}
