//! Ordered, id-deduplicated message lists per room.
//!
//! Every mutation source (local commands, persistence responses, the event
//! router) goes through here. Rows are kept in ascending `created_at` order
//! with ties in insertion order; a server id appears at most once per room.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use murmur_types::{DeliveryStatus, Message};

/// What [`RoomTimeline::apply_incoming`] did with a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Merged into the optimistic row holding this temp id.
    Reconciled { temp_id: String },
    /// A row with the same id existed and was refreshed in place.
    Updated,
    Inserted,
    /// Carried no server id.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct RoomTimeline {
    messages: Vec<Message>,
}

impl RoomTimeline {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn position_by_id(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.has_id(id))
    }

    pub fn position_by_temp(&self, temp_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.has_temp_id(temp_id))
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.has_id(id))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.has_id(id))
    }

    pub fn get_by_temp(&self, temp_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.has_temp_id(temp_id))
    }

    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.created_at)
    }

    /// Insert a server message, or refresh the row that already has its id.
    pub fn append(&mut self, message: Message) -> Incoming {
        let Some(id) = message.id.clone() else {
            warn!("dropping server message without id");
            return Incoming::Ignored;
        };
        match self.position_by_id(&id) {
            Some(idx) => {
                merge_server_copy(&mut self.messages[idx], message);
                self.settle(idx);
                Incoming::Updated
            }
            None => {
                let mut message = message;
                message.temp_id = None;
                self.insert_sorted(message);
                Incoming::Inserted
            }
        }
    }

    /// Insert the pending row for a local send.
    pub fn insert_optimistic(&mut self, message: Message) -> usize {
        debug_assert!(message.temp_id.is_some());
        self.insert_sorted(message)
    }

    /// Apply the persistence response for `temp_id`.
    ///
    /// Returns the row index, or `None` if neither the optimistic row nor an
    /// already-merged echo is present (the user discarded it meanwhile).
    pub fn reconcile(&mut self, temp_id: &str, server: Message) -> Option<usize> {
        let Some(id) = server.id.clone() else {
            warn!(temp_id, "persistence response without id");
            return None;
        };
        match self.position_by_temp(temp_id) {
            Some(idx) => Some(self.merge_into_optimistic(idx, &id, server)),
            None => {
                // The echo got here first and already took the row over.
                let idx = self.position_by_id(&id)?;
                self.messages[idx].delivery_status = Some(DeliveryStatus::Synced);
                Some(idx)
            }
        }
    }

    /// Route a pushed message: merge an echo of our own pending send, refresh
    /// a known row, or insert a new one.
    pub fn apply_incoming(&mut self, message: Message, self_id: &str) -> Incoming {
        let Some(id) = message.id.clone() else {
            warn!("dropping pushed message without id");
            return Incoming::Ignored;
        };

        if message.sender_id == self_id {
            if let Some(temp_id) = message.temp_id.clone() {
                // Match on (temp id, sender), never on "some pending row".
                let found = self
                    .messages
                    .iter()
                    .position(|m| m.has_temp_id(&temp_id) && m.sender_id == message.sender_id);
                if let Some(idx) = found {
                    self.merge_into_optimistic(idx, &id, message);
                    return Incoming::Reconciled { temp_id };
                }
            }
        }

        self.append(message)
    }

    /// Remove by server id. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<(usize, Message)> {
        let idx = self.position_by_id(id)?;
        Some((idx, self.messages.remove(idx)))
    }

    pub fn remove_temp(&mut self, temp_id: &str) -> Option<(usize, Message)> {
        let idx = self.position_by_temp(temp_id)?;
        Some((idx, self.messages.remove(idx)))
    }

    /// Put a removed row back at `index`, used to undo a delete.
    pub fn reinsert(&mut self, index: usize, message: Message) {
        if let Some(id) = message.id.as_deref() {
            if self.position_by_id(id).is_some() {
                return;
            }
        }
        let at = index.min(self.messages.len());
        self.messages.insert(at, message);
        self.settle(at);
    }

    /// Edit in place. Returns the previous `(content, edited)`.
    pub fn update(&mut self, id: &str, content: &str) -> Option<(String, bool)> {
        let message = self.get_mut(id)?;
        let previous = (std::mem::replace(&mut message.content, content.to_string()), message.edited);
        message.edited = true;
        Some(previous)
    }

    pub fn restore_content(&mut self, id: &str, content: String, edited: bool) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.content = content;
                message.edited = edited;
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, temp_id: &str, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| m.has_temp_id(temp_id)) {
            Some(message) => {
                message.delivery_status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Merge an older history page. Rows already held win over the page;
    /// the result stays sorted with page rows ahead of equal-time live rows.
    pub fn prepend_page(&mut self, page: Vec<Message>) -> usize {
        let mut seen: HashSet<String> = self.messages.iter().filter_map(|m| m.id.clone()).collect();
        let mut fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| match m.id.as_deref() {
                Some(id) => seen.insert(id.to_string()),
                None => false,
            })
            .map(|mut m| {
                m.temp_id = None;
                m
            })
            .collect();
        fresh.sort_by_key(|m| m.created_at);
        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        let existing = std::mem::take(&mut self.messages);
        let mut merged = Vec::with_capacity(existing.len() + added);
        let mut older = fresh.into_iter().peekable();
        for live in existing {
            while older.peek().is_some_and(|m| m.created_at <= live.created_at) {
                merged.extend(older.next());
            }
            merged.push(live);
        }
        merged.extend(older);
        self.messages = merged;
        added
    }

    fn insert_sorted(&mut self, message: Message) -> usize {
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        at
    }

    fn merge_into_optimistic(&mut self, idx: usize, id: &str, server: Message) -> usize {
        // An unmatched copy under the server id would become a second row.
        let mut idx = idx;
        if let Some(dup) = self.messages.iter().position(|m| m.has_id(id)) {
            if dup != idx {
                debug!(id, "collapsing duplicate row into optimistic entry");
                self.messages.remove(dup);
                if dup < idx {
                    idx -= 1;
                }
            }
        }

        let row = &mut self.messages[idx];
        let reactions = std::mem::take(&mut row.reactions);
        *row = server;
        row.temp_id = None;
        row.delivery_status = Some(DeliveryStatus::Synced);
        if row.reactions.is_empty() {
            row.reactions = reactions;
        }
        self.settle(idx)
    }

    /// Move the row at `idx` if its timestamp no longer fits between its neighbours.
    fn settle(&mut self, idx: usize) -> usize {
        let ts = self.messages[idx].created_at;
        let before_ok = idx == 0 || self.messages[idx - 1].created_at <= ts;
        let after_ok = idx + 1 >= self.messages.len() || ts <= self.messages[idx + 1].created_at;
        if before_ok && after_ok {
            return idx;
        }
        let message = self.messages.remove(idx);
        self.insert_sorted(message)
    }
}

/// Last-writer-wins refresh of a known row from a server copy. Local delivery
/// status survives; reactions are only taken when the server sent some.
fn merge_server_copy(row: &mut Message, server: Message) {
    let status = row.delivery_status;
    let reactions = std::mem::take(&mut row.reactions);
    *row = server;
    row.temp_id = None;
    row.delivery_status = status;
    if row.reactions.is_empty() {
        row.reactions = reactions;
    }
}

/// Session-wide store: one timeline per attached room.
///
/// A room must be attached before anything is written to it; writes for a
/// detached room are dropped. That is how stale persistence responses after
/// leaving a room are discarded.
#[derive(Debug, Default)]
pub struct MessageStore {
    rooms: HashMap<String, RoomTimeline>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the room was already attached.
    pub fn attach(&mut self, room_id: &str) -> bool {
        if self.rooms.contains_key(room_id) {
            return false;
        }
        self.rooms.insert(room_id.to_string(), RoomTimeline::default());
        true
    }

    pub fn detach(&mut self, room_id: &str) -> Option<RoomTimeline> {
        self.rooms.remove(room_id)
    }

    pub fn is_attached(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn timeline(&self, room_id: &str) -> Option<&RoomTimeline> {
        self.rooms.get(room_id)
    }

    pub fn timeline_mut(&mut self, room_id: &str) -> Option<&mut RoomTimeline> {
        self.rooms.get_mut(room_id)
    }

    /// Messages of a room in display order; empty for unknown rooms.
    pub fn list(&self, room_id: &str) -> &[Message] {
        self.rooms
            .get(room_id)
            .map(|t| t.messages())
            .unwrap_or(&[])
    }

    pub fn append(&mut self, room_id: &str, message: Message) -> Option<Incoming> {
        self.rooms.get_mut(room_id).map(|t| t.append(message))
    }

    pub fn insert_optimistic(&mut self, room_id: &str, message: Message) -> Option<usize> {
        self.rooms
            .get_mut(room_id)
            .map(|t| t.insert_optimistic(message))
    }

    pub fn reconcile(&mut self, room_id: &str, temp_id: &str, server: Message) -> Option<usize> {
        self.rooms.get_mut(room_id)?.reconcile(temp_id, server)
    }

    pub fn remove(&mut self, room_id: &str, id: &str) -> Option<(usize, Message)> {
        self.rooms.get_mut(room_id)?.remove(id)
    }

    pub fn update(&mut self, room_id: &str, id: &str, content: &str) -> Option<(String, bool)> {
        self.rooms.get_mut(room_id)?.update(id, content)
    }
}
