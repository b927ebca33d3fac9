use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events pushed by the server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Full message broadcast to every room member, the sender included.
    Message(Message),

    MessageDeleted { room_id: String, id: String },

    MessageEdited {
        room_id: String,
        id: String,
        content: String,
    },

    ReactionAdded {
        room_id: String,
        id: String,
        user_id: String,
        emoji: String,
    },

    ReactionRemoved {
        room_id: String,
        id: String,
        user_id: String,
        emoji: String,
    },

    TypingStarted {
        room_id: String,
        display_name: String,
    },

    /// `display_name` absent means everybody in the room stopped.
    TypingStopped {
        room_id: String,
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Full snapshot of the keys currently present on the presence channel.
    PresenceSync { keys: Vec<String> },

    PresenceJoin { key: String },

    PresenceLeave { key: String },
}

impl GatewayEvent {
    /// Returns the room id if this event is scoped to a room.
    /// Presence events return `None`.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Message(msg) => Some(&msg.room_id),
            Self::MessageDeleted { room_id, .. }
            | Self::MessageEdited { room_id, .. }
            | Self::ReactionAdded { room_id, .. }
            | Self::ReactionRemoved { room_id, .. }
            | Self::TypingStarted { room_id, .. }
            | Self::TypingStopped { room_id, .. } => Some(room_id),
            Self::PresenceSync { .. } | Self::PresenceJoin { .. } | Self::PresenceLeave { .. } => {
                None
            }
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::MessageEdited { .. } => "message_edited",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::TypingStarted { .. } => "typing_started",
            Self::TypingStopped { .. } => "typing_stopped",
            Self::PresenceSync { .. } => "presence_sync",
            Self::PresenceJoin { .. } => "presence_join",
            Self::PresenceLeave { .. } => "presence_leave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving events for a room
    Join { room_id: String },

    /// Stop receiving events for a room
    Leave { room_id: String },

    TypingStart { room_id: String, display_name: String },

    TypingStop { room_id: String },

    /// Join the presence channel scoped to these peers
    PresenceSubscribe { keys: Vec<String> },

    /// Announce our own presence on the subscribed channel
    PresenceTrack { status: PresenceStatus },

    PresenceUntrack,

    PresenceUnsubscribe,
}
