use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reactors for one emoji, in the order they reacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub user_ids: Vec<String>,
}

impl ReactionGroup {
    pub fn count(&self) -> usize {
        self.user_ids.len()
    }
}

/// Per-message `emoji -> ordered set of user ids`.
///
/// Emoji keep first-reaction order. A user appears at most once per emoji.
/// Groups emptied by removals stay in the backing list and are skipped by
/// [`Reactions::visible`]; equality ignores them.
#[derive(Debug, Clone, Default)]
pub struct Reactions {
    groups: Vec<ReactionGroup>,
}

impl PartialEq for Reactions {
    fn eq(&self, other: &Self) -> bool {
        self.visible().eq(other.visible())
    }
}

impl Eq for Reactions {}

impl Reactions {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.user_ids.is_empty())
    }

    pub fn has(&self, emoji: &str, user_id: &str) -> bool {
        self.group(emoji)
            .is_some_and(|g| g.user_ids.iter().any(|u| u == user_id))
    }

    pub fn group(&self, emoji: &str) -> Option<&ReactionGroup> {
        self.groups.iter().find(|g| g.emoji == emoji)
    }

    /// Reactors for `emoji`, empty if nobody reacted with it.
    pub fn users(&self, emoji: &str) -> &[String] {
        self.group(emoji).map(|g| g.user_ids.as_slice()).unwrap_or(&[])
    }

    /// Groups with at least one reactor.
    pub fn visible(&self) -> impl Iterator<Item = &ReactionGroup> {
        self.groups.iter().filter(|g| !g.user_ids.is_empty())
    }

    /// Append `user_id` to the reactors of `emoji`. Returns false if already present.
    pub fn add(&mut self, emoji: &str, user_id: &str) -> bool {
        let group = self.group_mut(emoji);
        if group.user_ids.iter().any(|u| u == user_id) {
            return false;
        }
        group.user_ids.push(user_id.to_string());
        true
    }

    /// Remove `user_id` from `emoji`. Returns the position it held.
    pub fn remove(&mut self, emoji: &str, user_id: &str) -> Option<usize> {
        let group = self.groups.iter_mut().find(|g| g.emoji == emoji)?;
        let pos = group.user_ids.iter().position(|u| u == user_id)?;
        group.user_ids.remove(pos);
        Some(pos)
    }

    /// Put `user_id` back at `position` (clamped), used to undo a removal.
    pub fn insert_at(&mut self, emoji: &str, user_id: &str, position: usize) -> bool {
        let group = self.group_mut(emoji);
        if group.user_ids.iter().any(|u| u == user_id) {
            return false;
        }
        let at = position.min(group.user_ids.len());
        group.user_ids.insert(at, user_id.to_string());
        true
    }

    fn group_mut(&mut self, emoji: &str) -> &mut ReactionGroup {
        let idx = match self.groups.iter().position(|g| g.emoji == emoji) {
            Some(idx) => idx,
            None => {
                self.groups.push(ReactionGroup {
                    emoji: emoji.to_string(),
                    user_ids: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx]
    }
}

// Wire form is a JSON object `{ emoji: [user ids] }` whose key order is the
// emoji order, so (de)serialization walks entries instead of going through a map type.
impl Serialize for Reactions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for group in &self.groups {
            map.serialize_entry(&group.emoji, &group.user_ids)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Reactions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ReactionsVisitor;

        impl<'de> Visitor<'de> for ReactionsVisitor {
            type Value = Reactions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of emoji to user id lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Reactions, A::Error> {
                let mut reactions = Reactions::default();
                while let Some((emoji, users)) = access.next_entry::<String, Vec<String>>()? {
                    // Duplicated user ids in the payload collapse to one.
                    reactions.group_mut(&emoji);
                    for user in users {
                        reactions.add(&emoji, &user);
                    }
                }
                Ok(reactions)
            }
        }

        deserializer.deserialize_map(ReactionsVisitor)
    }
}
