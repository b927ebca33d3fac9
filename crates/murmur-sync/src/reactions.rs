//! Reaction mutations on a room timeline: optimistic local toggles with an
//! exact undo, and idempotent peer add/remove events.

use tracing::trace;

use crate::error::{Result, SyncError};
use crate::store::RoomTimeline;

/// Result of an optimistic toggle, enough to undo it exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionToggle {
    pub message_id: String,
    pub emoji: String,
    pub user_id: String,
    /// `None` if the toggle added the reaction, else the position it was removed from.
    pub removed_at: Option<usize>,
}

impl ReactionToggle {
    pub fn added(&self) -> bool {
        self.removed_at.is_none()
    }
}

pub struct ReactionAggregator;

impl ReactionAggregator {
    /// Flip `user_id`'s `emoji` reaction on `message_id`.
    pub fn toggle(
        timeline: &mut RoomTimeline,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<ReactionToggle> {
        let message = timeline
            .get_mut(message_id)
            .ok_or_else(|| SyncError::NotFound(message_id.to_string()))?;

        let removed_at = if message.reactions.has(emoji, user_id) {
            message.reactions.remove(emoji, user_id)
        } else {
            message.reactions.add(emoji, user_id);
            None
        };
        trace!(message_id, emoji, user_id, added = removed_at.is_none(), "reaction toggled");

        Ok(ReactionToggle {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
            removed_at,
        })
    }

    /// Restore the state from before `toggle`.
    pub fn undo(timeline: &mut RoomTimeline, toggle: &ReactionToggle) {
        let Some(message) = timeline.get_mut(&toggle.message_id) else {
            return;
        };
        match toggle.removed_at {
            None => {
                message.reactions.remove(&toggle.emoji, &toggle.user_id);
            }
            Some(position) => {
                message
                    .reactions
                    .insert_at(&toggle.emoji, &toggle.user_id, position);
            }
        }
    }

    /// Peer added a reaction. Returns true if state changed.
    pub fn peer_added(timeline: &mut RoomTimeline, message_id: &str, user_id: &str, emoji: &str) -> bool {
        match timeline.get_mut(message_id) {
            Some(message) => message.reactions.add(emoji, user_id),
            None => false,
        }
    }

    /// Peer removed a reaction. Returns true if state changed.
    pub fn peer_removed(timeline: &mut RoomTimeline, message_id: &str, user_id: &str, emoji: &str) -> bool {
        match timeline.get_mut(message_id) {
            Some(message) => message.reactions.remove(emoji, user_id).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use murmur_types::{Draft, Message};

    use super::*;

    fn timeline_with(id: &str) -> RoomTimeline {
        let mut m = Message::optimistic("r1", "u2", "tmp", &Draft::text("hi"), Utc::now());
        m.id = Some(id.into());
        m.temp_id = None;
        let mut t = RoomTimeline::default();
        t.append(m);
        t
    }

    fn users(t: &RoomTimeline, id: &str, emoji: &str) -> Vec<String> {
        t.get(id).unwrap().reactions.users(emoji).to_vec()
    }

    #[test]
    fn toggle_twice_restores_reactors() {
        let mut t = timeline_with("m1");
        ReactionAggregator::peer_added(&mut t, "m1", "a", "👍");
        ReactionAggregator::peer_added(&mut t, "m1", "b", "👍");
        let before = users(&t, "m1", "👍");

        let first = ReactionAggregator::toggle(&mut t, "m1", "👍", "me").unwrap();
        assert!(first.added());
        assert_eq!(users(&t, "m1", "👍"), ["a", "b", "me"]);
        let second = ReactionAggregator::toggle(&mut t, "m1", "👍", "me").unwrap();
        assert!(!second.added());
        assert_eq!(users(&t, "m1", "👍"), before);
    }

    #[test]
    fn undo_of_removal_restores_position() {
        let mut t = timeline_with("m1");
        for u in ["a", "me", "b"] {
            ReactionAggregator::peer_added(&mut t, "m1", u, "🔥");
        }
        let toggle = ReactionAggregator::toggle(&mut t, "m1", "🔥", "me").unwrap();
        assert_eq!(toggle.removed_at, Some(1));
        ReactionAggregator::undo(&mut t, &toggle);
        assert_eq!(users(&t, "m1", "🔥"), ["a", "me", "b"]);
    }

    #[test]
    fn undo_of_add_removes_it() {
        let mut t = timeline_with("m1");
        let toggle = ReactionAggregator::toggle(&mut t, "m1", "🎉", "me").unwrap();
        ReactionAggregator::undo(&mut t, &toggle);
        assert!(t.get("m1").unwrap().reactions.is_empty());
    }

    #[test]
    fn peer_events_are_idempotent() {
        let mut t = timeline_with("m1");
        assert!(ReactionAggregator::peer_added(&mut t, "m1", "a", "👍"));
        let once = t.get("m1").unwrap().reactions.clone();
        assert!(!ReactionAggregator::peer_added(&mut t, "m1", "a", "👍"));
        assert_eq!(t.get("m1").unwrap().reactions, once);

        assert!(ReactionAggregator::peer_removed(&mut t, "m1", "a", "👍"));
        assert!(!ReactionAggregator::peer_removed(&mut t, "m1", "a", "👍"));
        assert!(!ReactionAggregator::peer_added(&mut t, "missing", "a", "👍"));
    }

    #[test]
    fn toggle_on_unknown_message_fails() {
        let mut t = timeline_with("m1");
        assert!(matches!(
            ReactionAggregator::toggle(&mut t, "nope", "👍", "me"),
            Err(SyncError::NotFound(_))
        ));
    }
}
