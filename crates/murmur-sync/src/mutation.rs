//! One command/rollback pair per optimistic mutation type.
//!
//! `Mutation::apply` changes the timeline before the backend is asked and
//! hands back the `Rollback` that undoes exactly that change.

use murmur_types::{DeliveryStatus, Message};

use crate::error::{Result, SyncError};
use crate::reactions::{ReactionAggregator, ReactionToggle};
use crate::store::RoomTimeline;

#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert (or, on retry, re-mark) the pending row for a local send.
    Send(Message),
    Edit { id: String, content: String },
    Delete { id: String },
    React {
        message_id: String,
        emoji: String,
        user_id: String,
    },
}

#[derive(Debug, Clone)]
pub enum Rollback {
    /// A send never removes its row: the row is kept as failed for a retry.
    MarkFailed { temp_id: String },
    RestoreContent {
        id: String,
        content: String,
        edited: bool,
    },
    Reinsert { index: usize, message: Message },
    Reaction(ReactionToggle),
}

impl Mutation {
    pub fn apply(self, timeline: &mut RoomTimeline) -> Result<Rollback> {
        match self {
            Mutation::Send(message) => {
                let temp_id = message
                    .temp_id
                    .clone()
                    .ok_or_else(|| SyncError::Validation("send without temp id".into()))?;
                if !timeline.set_status(&temp_id, DeliveryStatus::Pending) {
                    timeline.insert_optimistic(message);
                }
                Ok(Rollback::MarkFailed { temp_id })
            }
            Mutation::Edit { id, content } => {
                let (previous, edited) = timeline
                    .update(&id, &content)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))?;
                Ok(Rollback::RestoreContent {
                    id,
                    content: previous,
                    edited,
                })
            }
            Mutation::Delete { id } => {
                let (index, message) = timeline
                    .remove(&id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))?;
                Ok(Rollback::Reinsert { index, message })
            }
            Mutation::React {
                message_id,
                emoji,
                user_id,
            } => ReactionAggregator::toggle(timeline, &message_id, &emoji, &user_id)
                .map(Rollback::Reaction),
        }
    }
}

impl Rollback {
    pub fn undo(self, timeline: &mut RoomTimeline) {
        match self {
            Rollback::MarkFailed { temp_id } => {
                timeline.set_status(&temp_id, DeliveryStatus::Failed);
            }
            Rollback::RestoreContent {
                id,
                content,
                edited,
            } => {
                timeline.restore_content(&id, content, edited);
            }
            Rollback::Reinsert { index, message } => timeline.reinsert(index, message),
            Rollback::Reaction(toggle) => ReactionAggregator::undo(timeline, &toggle),
        }
    }
}
