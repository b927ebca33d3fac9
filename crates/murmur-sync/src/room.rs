//! An open room: optimistic commands, the delivery tracker, the typing
//! debouncer and the remote typist roster, wired to the store and router.
//!
//! Every command follows the same shape: validate, apply a [`Mutation`]
//! under the store lock, await the backend with no lock held, then either
//! keep the optimistic state (merging the server copy) or run the
//! [`Rollback`]. Results for a room that was closed meanwhile are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use murmur_types::{ContentType, DeliveryStatus, Draft, Message};

use crate::backend::PersistResponseExt;
use crate::delivery::{DeliveryEntry, DeliveryState, DeliveryTracker, new_temp_id};
use crate::error::{Result, SyncError};
use crate::mutation::{Mutation, Rollback};
use crate::reactions::ReactionAggregator;
use crate::router::{EventRouter, RoomHandler, RouterGuard};
use crate::session::{SessionInner, SyncNotice};
use crate::store::{Incoming, RoomTimeline};
use crate::timeline::{TimelineItem, layout};
use crate::typing::{TypingDebouncer, TypingRoster};

/// Messages and their layout taken under one lock, so indices line up.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub messages: Vec<Message>,
    pub items: Vec<TimelineItem>,
}

pub struct Room {
    shared: Arc<RoomShared>,
    router: Mutex<Option<RouterGuard>>,
}

struct RoomShared {
    room_id: String,
    session: Arc<SessionInner>,
    delivery: Mutex<DeliveryTracker>,
    roster: Mutex<TypingRoster>,
    typing: TypingDebouncer,
    closed: AtomicBool,
    loading_history: AtomicBool,
}

impl Room {
    /// The store must already hold an attached timeline for `room_id`.
    pub(crate) fn open(session: Arc<SessionInner>, room_id: &str) -> Result<Self> {
        let typing = TypingDebouncer::new(
            room_id,
            session.display_name.clone(),
            session.config.typing_silence,
            session.gateway.clone(),
        );
        let shared = Arc::new(RoomShared {
            room_id: room_id.to_string(),
            delivery: Mutex::new(DeliveryTracker::new()),
            roster: Mutex::new(TypingRoster::new(session.config.remote_typing_ttl)),
            typing,
            closed: AtomicBool::new(false),
            loading_history: AtomicBool::new(false),
            session,
        });
        let router = EventRouter::attach(&shared.session.gateway, room_id, shared.clone())?;
        Ok(Self {
            shared,
            router: Mutex::new(Some(router)),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Optimistically send `draft`. The pending row is in the store before
    /// the backend is called. Returns the temp id of the send.
    pub async fn send(&self, draft: Draft) -> Result<String> {
        let shared = &self.shared;
        shared.ensure_open()?;
        validate_draft(&draft)?;
        if !shared.session.limiter.lock().try_consume() {
            return Err(SyncError::RateLimited);
        }

        let temp_id = new_temp_id();
        let message = Message::optimistic(
            &shared.room_id,
            &shared.session.user_id,
            &temp_id,
            &draft,
            Utc::now(),
        );
        let rollback = shared.with_timeline(|t| Mutation::Send(message.clone()).apply(t))??;
        shared.delivery.lock().begin(&temp_id, &shared.room_id, draft);
        debug!(room_id = %shared.room_id, temp_id, "send queued");

        shared.typing.cancel(shared.session.config.send_grace);
        shared.persist_send(&temp_id, message, rollback).await?;
        Ok(temp_id)
    }

    /// Resubmit a failed send with the same temp id.
    pub async fn retry(&self, temp_id: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;
        match shared.delivery.lock().get(temp_id) {
            None => return Err(SyncError::NotFound(temp_id.to_string())),
            Some(entry) if entry.state != DeliveryState::Failed => {
                return Err(SyncError::Validation(format!("{} is still in flight", temp_id)));
            }
            Some(_) => {}
        }
        if !shared.session.limiter.lock().try_consume() {
            return Err(SyncError::RateLimited);
        }

        let entry = shared.delivery.lock().retry(temp_id)?.clone();
        let row = shared
            .with_timeline(|t| t.get_by_temp(temp_id).cloned())?
            .unwrap_or_else(|| {
                Message::optimistic(
                    &shared.room_id,
                    &shared.session.user_id,
                    temp_id,
                    &entry.draft,
                    Utc::now(),
                )
            });
        let rollback = shared.with_timeline(|t| Mutation::Send(row.clone()).apply(t))??;
        info!(room_id = %shared.room_id, temp_id, attempt = entry.attempt, "retrying send");

        shared.persist_send(temp_id, row, rollback).await
    }

    /// Give up on a pending or failed send. Its row disappears.
    pub fn discard(&self, temp_id: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;
        shared
            .delivery
            .lock()
            .abandon(temp_id)
            .ok_or_else(|| SyncError::NotFound(temp_id.to_string()))?;
        shared.with_timeline(|t| t.remove_temp(temp_id))?;
        debug!(room_id = %shared.room_id, temp_id, "send discarded");
        Ok(())
    }

    /// Edit one of our own synced text messages.
    pub async fn edit(&self, id: &str, content: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;
        if content.trim().is_empty() {
            return Err(SyncError::Validation("message content is empty".into()));
        }
        let current = shared.own_synced(id)?.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        if current.content_type != ContentType::Text {
            return Err(SyncError::Validation(format!(
                "{:?} messages cannot be edited",
                current.content_type
            )));
        }
        if current.content == content {
            return Ok(());
        }

        let mutation = Mutation::Edit {
            id: id.to_string(),
            content: content.to_string(),
        };
        let rollback = shared.with_timeline(|t| mutation.apply(t))??;

        let outcome = shared
            .session
            .backend
            .edit_message(id, content)
            .await
            .and_then(PersistResponseExt::into_result);
        match outcome {
            Ok(server) => {
                if let Some(server) = server {
                    shared.apply_if_open(|t| {
                        t.append(server);
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!(room_id = %shared.room_id, id, "edit failed: {}", e);
                shared.apply_if_open(|t| rollback.undo(t));
                shared.session.notify(SyncNotice::EditFailed {
                    room_id: shared.room_id.clone(),
                    id: id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Delete one of our own synced messages. Deleting an id that is not
    /// (or no longer) held is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let Some(current) = shared.own_synced(id)? else {
            debug!(room_id = %shared.room_id, id, "delete of unknown message ignored");
            return Ok(());
        };

        let rollback = shared.with_timeline(|t| Mutation::Delete { id: id.to_string() }.apply(t))??;

        let outcome = shared
            .session
            .backend
            .delete_message(id, current.content_type, &current.content)
            .await
            .and_then(PersistResponseExt::into_result);
        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(room_id = %shared.room_id, id, "delete failed: {}", e);
                shared.apply_if_open(|t| rollback.undo(t));
                shared.session.notify(SyncNotice::DeleteFailed {
                    room_id: shared.room_id.clone(),
                    id: id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Flip our `emoji` reaction on `message_id`. Returns true if it is now set.
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<bool> {
        let shared = &self.shared;
        shared.ensure_open()?;
        if emoji.trim().is_empty() {
            return Err(SyncError::Validation("emoji is empty".into()));
        }
        shared.with_timeline(|t| {
            if t.get(message_id).is_none() && t.get_by_temp(message_id).is_some() {
                Err(SyncError::NotSynced(message_id.to_string()))
            } else {
                Ok(())
            }
        })??;

        let user_id = shared.session.user_id.clone();
        let mutation = Mutation::React {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
            user_id: user_id.clone(),
        };
        let rollback = shared.with_timeline(|t| mutation.apply(t))??;
        let added = matches!(&rollback, Rollback::Reaction(toggle) if toggle.added());

        let backend = &shared.session.backend;
        let call = if added {
            backend.add_reaction(message_id, &user_id, emoji).await
        } else {
            backend.remove_reaction(message_id, &user_id, emoji).await
        };
        match call.and_then(PersistResponseExt::into_result) {
            Ok(_) => Ok(added),
            Err(e) => {
                warn!(room_id = %shared.room_id, message_id, emoji, "reaction failed: {}", e);
                shared.apply_if_open(|t| rollback.undo(t));
                shared.session.notify(SyncNotice::ReactionFailed {
                    room_id: shared.room_id.clone(),
                    id: message_id.to_string(),
                    emoji: emoji.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Fetch the page before the oldest held message and merge it.
    /// Returns how many new rows were added; 0 while another load is running.
    pub async fn load_older(&self) -> Result<usize> {
        let shared = &self.shared;
        shared.ensure_open()?;
        if shared.loading_history.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let result = shared.load_page().await;
        shared.loading_history.store(false, Ordering::Release);
        result
    }

    pub fn typing(&self) -> &TypingDebouncer {
        &self.shared.typing
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.session.store.lock().list(&self.shared.room_id).to_vec()
    }

    pub fn layout<Tz: TimeZone>(&self, tz: &Tz) -> RoomView {
        let store = self.shared.session.store.lock();
        let messages = store.list(&self.shared.room_id).to_vec();
        drop(store);
        let items = layout(&messages, self.shared.session.config.group_gap, tz);
        RoomView { messages, items }
    }

    /// Remote typists in the order they started.
    pub fn typists(&self) -> Vec<String> {
        self.shared.roster.lock().active()
    }

    pub fn delivery(&self, temp_id: &str) -> Option<DeliveryEntry> {
        self.shared.delivery.lock().get(temp_id).cloned()
    }

    pub fn failed_sends(&self) -> Vec<DeliveryEntry> {
        self.shared.delivery.lock().failed().cloned().collect()
    }

    /// Stop typing, detach the router and drop the timeline. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.typing.shutdown();
        if let Some(mut router) = self.router.lock().take() {
            router.detach();
        }
        self.shared.session.store.lock().detach(&self.shared.room_id);
        self.shared.roster.lock().stop(None);
        info!(room_id = %self.shared.room_id, "room closed");
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.close();
    }
}

impl RoomShared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::RoomClosed(self.room_id.clone()));
        }
        Ok(())
    }

    /// Run `f` on this room's timeline, or fail with `RoomClosed`.
    fn with_timeline<R>(&self, f: impl FnOnce(&mut RoomTimeline) -> R) -> Result<R> {
        let mut store = self.session.store.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::RoomClosed(self.room_id.clone()));
        }
        let timeline = store
            .timeline_mut(&self.room_id)
            .ok_or_else(|| SyncError::RoomClosed(self.room_id.clone()))?;
        Ok(f(timeline))
    }

    /// Like [`RoomShared::with_timeline`] for late results: a closed room
    /// drops them silently.
    fn apply_if_open<R>(&self, f: impl FnOnce(&mut RoomTimeline) -> R) -> Option<R> {
        match self.with_timeline(f) {
            Ok(r) => Some(r),
            Err(_) => {
                debug!(room_id = %self.room_id, "dropping result for closed room");
                None
            }
        }
    }

    /// The synced row `id` if it is ours. `Ok(None)` if it is not held.
    fn own_synced(&self, id: &str) -> Result<Option<Message>> {
        let user_id = &self.session.user_id;
        self.with_timeline(|t| match t.get(id) {
            Some(message) if &message.sender_id != user_id => Err(SyncError::Validation(
                "only your own messages can be changed".into(),
            )),
            Some(message) => Ok(Some(message.clone())),
            None if t.get_by_temp(id).is_some() => Err(SyncError::NotSynced(id.to_string())),
            None => Ok(None),
        })?
    }

    async fn persist_send(&self, temp_id: &str, message: Message, rollback: Rollback) -> Result<()> {
        let outcome = self
            .session
            .backend
            .insert_message(&message)
            .await
            .and_then(PersistResponseExt::into_result);

        match outcome {
            Ok(server) => {
                let merged = self.apply_if_open(|t| {
                    // A body without an id cannot be merged; the echo brings it.
                    let merged = server.is_some_and(|s| t.reconcile(temp_id, s).is_some());
                    if !merged {
                        t.set_status(temp_id, DeliveryStatus::Synced);
                    }
                    merged
                });
                self.delivery.lock().resolve(temp_id);
                if merged == Some(true) {
                    debug!(room_id = %self.room_id, temp_id, "send reconciled");
                } else {
                    debug!(room_id = %self.room_id, temp_id, "send accepted, awaiting echo");
                }
                Ok(())
            }
            Err(e) => {
                // Without a temp row the echo already reconciled the send or
                // the user discarded it; either way there is nothing to fail.
                let rolled_back = self.apply_if_open(|t| {
                    if t.get_by_temp(temp_id).is_none() {
                        return false;
                    }
                    rollback.undo(t);
                    true
                });
                if rolled_back == Some(false) {
                    self.delivery.lock().resolve(temp_id);
                    debug!(room_id = %self.room_id, temp_id, "late send failure ignored: {}", e);
                    return Ok(());
                }

                warn!(room_id = %self.room_id, temp_id, "send failed: {}", e);
                self.delivery.lock().fail(temp_id, e.to_string());
                if rolled_back.is_some() {
                    self.session.notify(SyncNotice::SendFailed {
                        room_id: self.room_id.clone(),
                        temp_id: temp_id.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn load_page(&self) -> Result<usize> {
        let before = self.with_timeline(|t| t.oldest_created_at())?;
        let limit = self.session.config.history_page;
        match self
            .session
            .backend
            .fetch_history(&self.room_id, before, limit)
            .await
        {
            Ok(page) => {
                let fetched = page.len();
                let added = self.apply_if_open(|t| t.prepend_page(page)).unwrap_or(0);
                debug!(room_id = %self.room_id, fetched, added, "history page merged");
                Ok(added)
            }
            Err(e) => {
                warn!(room_id = %self.room_id, "history fetch failed: {}", e);
                self.session.notify(SyncNotice::HistoryFailed {
                    room_id: self.room_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

impl RoomHandler for RoomShared {
    fn on_message(&self, message: Message) {
        let self_id = self.session.user_id.clone();
        let outcome = self.apply_if_open(|t| t.apply_incoming(message, &self_id));
        if let Some(Incoming::Reconciled { temp_id }) = outcome {
            self.delivery.lock().resolve(&temp_id);
            debug!(room_id = %self.room_id, temp_id, "send reconciled by echo");
        }
    }

    fn on_deleted(&self, id: &str) {
        self.apply_if_open(|t| t.remove(id));
    }

    fn on_edited(&self, id: &str, content: &str) {
        self.apply_if_open(|t| t.update(id, content));
    }

    fn on_reaction(&self, id: &str, user_id: &str, emoji: &str, added: bool) {
        self.apply_if_open(|t| {
            if added {
                ReactionAggregator::peer_added(t, id, user_id, emoji)
            } else {
                ReactionAggregator::peer_removed(t, id, user_id, emoji)
            }
        });
    }

    fn on_typing(&self, display_name: Option<&str>, started: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if display_name == Some(self.session.display_name.as_str()) {
            return;
        }
        let mut roster = self.roster.lock();
        match (display_name, started) {
            (Some(name), true) => {
                roster.start(name, Instant::now());
            }
            (name, false) => {
                roster.stop(name);
            }
            (None, true) => {}
        }
    }
}

/// Checks done before anything optimistic happens.
fn validate_draft(draft: &Draft) -> Result<()> {
    if draft.content.trim().is_empty() {
        return Err(SyncError::Validation("message content is empty".into()));
    }
    if draft.content_type.carries_attachments() {
        let attachments = murmur_types::models::parse_attachments(&draft.content)
            .map_err(|e| SyncError::Validation(format!("bad attachment list: {}", e)))?;
        if attachments.is_empty() {
            return Err(SyncError::Validation("attachment list is empty".into()));
        }
    }
    Ok(())
}
