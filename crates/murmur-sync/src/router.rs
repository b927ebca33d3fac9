//! Per-room demultiplexer from the gateway bus to the room's components.
//!
//! The router only decides *who* gets an event. What the event does is up to
//! the [`RoomHandler`].

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use murmur_types::Message;
use murmur_types::events::GatewayEvent;

use crate::error::Result;
use crate::gateway::Gateway;

/// Receiver side of a room's events. Called from the router task, one event
/// at a time and in arrival order.
pub trait RoomHandler: Send + Sync + 'static {
    fn on_message(&self, message: Message);
    fn on_deleted(&self, id: &str);
    fn on_edited(&self, id: &str, content: &str);
    fn on_reaction(&self, id: &str, user_id: &str, emoji: &str, added: bool);
    /// `started == false` with no name means the whole room stopped.
    fn on_typing(&self, display_name: Option<&str>, started: bool);
}

pub struct EventRouter;

impl EventRouter {
    /// Subscribe to the bus, join `room_id` and start routing.
    ///
    /// The returned guard owns the attachment: dropping or detaching it stops
    /// routing and leaves the room.
    pub fn attach<H: RoomHandler>(
        gateway: &Gateway,
        room_id: &str,
        handler: Arc<H>,
    ) -> Result<RouterGuard> {
        // Subscribe before joining so nothing sent in reply to the join is missed.
        let mut events = gateway.subscribe();
        gateway.join_room(room_id)?;
        info!(room_id, "router attached");

        let room = room_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.room_id() == Some(room.as_str()) {
                            dispatch(handler.as_ref(), event);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(room_id = %room, "router lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => {
                        debug!(room_id = %room, "gateway bus closed");
                        break;
                    }
                }
            }
        });

        Ok(RouterGuard {
            room_id: room_id.to_string(),
            gateway: gateway.clone(),
            task: Some(task),
        })
    }
}

fn dispatch<H: RoomHandler + ?Sized>(handler: &H, event: GatewayEvent) {
    trace!(kind = event.kind(), "routing event");
    match event {
        GatewayEvent::Message(message) => handler.on_message(message),
        GatewayEvent::MessageDeleted { id, .. } => handler.on_deleted(&id),
        GatewayEvent::MessageEdited { id, content, .. } => handler.on_edited(&id, &content),
        GatewayEvent::ReactionAdded {
            id, user_id, emoji, ..
        } => handler.on_reaction(&id, &user_id, &emoji, true),
        GatewayEvent::ReactionRemoved {
            id, user_id, emoji, ..
        } => handler.on_reaction(&id, &user_id, &emoji, false),
        GatewayEvent::TypingStarted { display_name, .. } => {
            handler.on_typing(Some(&display_name), true)
        }
        GatewayEvent::TypingStopped { display_name, .. } => {
            handler.on_typing(display_name.as_deref(), false)
        }
        GatewayEvent::PresenceSync { .. }
        | GatewayEvent::PresenceJoin { .. }
        | GatewayEvent::PresenceLeave { .. } => {}
    }
}

/// One live router attachment. Exactly one `Leave` is sent per guard.
pub struct RouterGuard {
    room_id: String,
    gateway: Gateway,
    task: Option<JoinHandle<()>>,
}

impl RouterGuard {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_attached(&self) -> bool {
        self.task.is_some()
    }

    pub fn detach(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Err(e) = self.gateway.leave_room(&self.room_id) {
            warn!(room_id = %self.room_id, "leave not sent: {}", e);
        }
        info!(room_id = %self.room_id, "router detached");
    }
}

impl Drop for RouterGuard {
    fn drop(&mut self) {
        self.detach();
    }
}
