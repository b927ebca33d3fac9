//! In-process bus between the session and the push transport.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use murmur_types::events::{GatewayCommand, GatewayEvent, PresenceStatus};

use crate::error::{Result, SyncError};

/// Session-owned handle to the push channel.
///
/// Inbound events fan out over a broadcast channel to every attached router
/// and presence watch. Outbound commands queue on an unbounded channel read
/// by the transport (see [`GatewayLink`]). The handle also remembers which
/// rooms are joined and what presence was announced so a transport can
/// replay them after a reconnect.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    event_tx: broadcast::Sender<GatewayEvent>,
    command_tx: mpsc::UnboundedSender<GatewayCommand>,
    connected: AtomicBool,
    /// room_id -> number of live attachments
    joined: Mutex<HashMap<String, usize>>,
    /// One entry per live presence watch, in registration order.
    presence: Mutex<BTreeMap<u64, PresenceRegistration>>,
    next_presence_id: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PresenceRegistration {
    keys: Vec<String>,
    status: Option<PresenceStatus>,
}

/// Handle for one presence registration on a [`Gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresenceId(u64);

/// What the server should currently see: the union of every watched key
/// and the status of the most recent tracked registration.
#[derive(Debug, PartialEq, Eq)]
struct PresenceState {
    keys: Vec<String>,
    status: Option<PresenceStatus>,
}

impl PresenceState {
    fn of(registrations: &BTreeMap<u64, PresenceRegistration>) -> Self {
        let mut keys: Vec<String> = Vec::new();
        let mut status = None;
        for registration in registrations.values() {
            for key in &registration.keys {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            if registration.status.is_some() {
                status = registration.status;
            }
        }
        Self { keys, status }
    }
}

/// Transport side of a [`Gateway`]: the outbound command stream plus a
/// weak handle back. Once every `Gateway` clone is dropped the command
/// stream ends, which is how the transport learns to shut down.
pub struct GatewayLink {
    pub commands: mpsc::UnboundedReceiver<GatewayCommand>,
    inner: Weak<GatewayInner>,
}

impl GatewayLink {
    pub fn gateway(&self) -> Option<Gateway> {
        self.inner.upgrade().map(|inner| Gateway { inner })
    }

    /// Returns false if the session is gone.
    pub fn deliver(&self, event: GatewayEvent) -> bool {
        match self.gateway() {
            Some(gateway) => {
                gateway.deliver(event);
                true
            }
            None => false,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        if let Some(gateway) = self.gateway() {
            gateway.set_connected(connected);
        }
    }

    pub fn replay_commands(&self) -> Vec<GatewayCommand> {
        self.gateway()
            .map(|gateway| gateway.replay_commands())
            .unwrap_or_default()
    }
}

impl Gateway {
    pub fn new(event_buffer: usize) -> (Self, GatewayLink) {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (command_tx, commands) = mpsc::unbounded_channel();
        let gateway = Self {
            inner: Arc::new(GatewayInner {
                event_tx,
                command_tx,
                connected: AtomicBool::new(false),
                joined: Mutex::new(HashMap::new()),
                presence: Mutex::new(BTreeMap::new()),
                next_presence_id: AtomicU64::new(1),
            }),
        };
        let link = GatewayLink {
            commands,
            inner: Arc::downgrade(&gateway.inner),
        };
        (gateway, link)
    }

    /// Subscribe to inbound events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Hand an inbound event to every subscriber. Called by the transport.
    pub fn deliver(&self, event: GatewayEvent) {
        // No subscribers is normal before any room is open.
        let _ = self.inner.event_tx.send(event);
    }

    /// Queue an outbound command.
    pub fn send(&self, command: GatewayCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.inner.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            info!(connected, "gateway connection state changed");
        }
    }

    /// Register a room attachment and issue `Join`.
    pub fn join_room(&self, room_id: &str) -> Result<()> {
        *self
            .inner
            .joined
            .lock()
            .entry(room_id.to_string())
            .or_insert(0) += 1;
        debug!(room_id, "joining room");
        self.send(GatewayCommand::Join {
            room_id: room_id.to_string(),
        })
    }

    /// Drop a room attachment and issue `Leave`.
    pub fn leave_room(&self, room_id: &str) -> Result<()> {
        {
            let mut joined = self.inner.joined.lock();
            if let Some(count) = joined.get_mut(room_id) {
                *count -= 1;
                if *count == 0 {
                    joined.remove(room_id);
                }
            }
        }
        debug!(room_id, "leaving room");
        self.send(GatewayCommand::Leave {
            room_id: room_id.to_string(),
        })
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.inner.joined.lock().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Register a presence watch and subscribe to the union of all watched keys.
    pub fn subscribe_presence(&self, keys: Vec<String>) -> Result<PresenceId> {
        let id = self.inner.next_presence_id.fetch_add(1, Ordering::Relaxed);
        let union = {
            let mut presence = self.inner.presence.lock();
            presence.insert(id, PresenceRegistration { keys, status: None });
            PresenceState::of(&presence).keys
        };
        if let Err(e) = self.send(GatewayCommand::PresenceSubscribe { keys: union }) {
            self.inner.presence.lock().remove(&id);
            return Err(e);
        }
        Ok(PresenceId(id))
    }

    pub fn track_presence(&self, id: PresenceId, status: PresenceStatus) -> Result<()> {
        if let Some(registration) = self.inner.presence.lock().get_mut(&id.0) {
            registration.status = Some(status);
        }
        self.send(GatewayCommand::PresenceTrack { status })
    }

    /// Drop one registration. The server is untracked and unsubscribed only
    /// when the last one goes; otherwise it is told the narrowed key set and
    /// the status still in effect.
    pub fn unsubscribe_presence(&self, id: PresenceId) -> Result<()> {
        let (before, after, last) = {
            let mut presence = self.inner.presence.lock();
            let before = PresenceState::of(&presence);
            if presence.remove(&id.0).is_none() {
                return Ok(());
            }
            (before, PresenceState::of(&presence), presence.is_empty())
        };

        if last {
            if before.status.is_some() {
                self.send(GatewayCommand::PresenceUntrack)?;
            }
            return self.send(GatewayCommand::PresenceUnsubscribe);
        }
        if after.keys != before.keys {
            self.send(GatewayCommand::PresenceSubscribe { keys: after.keys })?;
        }
        match (before.status, after.status) {
            (Some(_), None) => self.send(GatewayCommand::PresenceUntrack),
            (old, Some(status)) if old != Some(status) => {
                self.send(GatewayCommand::PresenceTrack { status })
            }
            _ => Ok(()),
        }
    }

    /// Commands that restore the current subscriptions on a fresh connection.
    pub fn replay_commands(&self) -> Vec<GatewayCommand> {
        let mut commands: Vec<GatewayCommand> = self
            .joined_rooms()
            .into_iter()
            .map(|room_id| GatewayCommand::Join { room_id })
            .collect();

        let presence = self.inner.presence.lock();
        if !presence.is_empty() {
            let state = PresenceState::of(&presence);
            commands.push(GatewayCommand::PresenceSubscribe { keys: state.keys });
            if let Some(status) = state.status {
                commands.push(GatewayCommand::PresenceTrack { status });
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave_are_paired_and_counted() {
        let (gateway, mut link) = Gateway::new(16);
        gateway.join_room("r1").unwrap();
        gateway.join_room("r1").unwrap();
        gateway.leave_room("r1").unwrap();
        assert_eq!(gateway.joined_rooms(), ["r1"]);
        gateway.leave_room("r1").unwrap();
        assert!(gateway.joined_rooms().is_empty());

        let mut sent = Vec::new();
        while let Ok(cmd) = link.commands.try_recv() {
            sent.push(cmd);
        }
        let joins = sent.iter().filter(|c| matches!(c, GatewayCommand::Join { .. })).count();
        let leaves = sent.iter().filter(|c| matches!(c, GatewayCommand::Leave { .. })).count();
        assert_eq!((joins, leaves), (2, 2));
    }

    #[test]
    fn replay_restores_rooms_and_presence() {
        let (gateway, _link) = Gateway::new(16);
        gateway.join_room("b").unwrap();
        gateway.join_room("a").unwrap();
        let id = gateway.subscribe_presence(vec!["u2".into()]).unwrap();
        gateway.track_presence(id, PresenceStatus::Online).unwrap();

        assert_eq!(
            gateway.replay_commands(),
            vec![
                GatewayCommand::Join { room_id: "a".into() },
                GatewayCommand::Join { room_id: "b".into() },
                GatewayCommand::PresenceSubscribe { keys: vec!["u2".into()] },
                GatewayCommand::PresenceTrack { status: PresenceStatus::Online },
            ]
        );

        gateway.unsubscribe_presence(id).unwrap();
        assert_eq!(gateway.replay_commands().len(), 2);
    }

    fn drain(link: &mut GatewayLink) -> Vec<GatewayCommand> {
        let mut sent = Vec::new();
        while let Ok(cmd) = link.commands.try_recv() {
            sent.push(cmd);
        }
        sent
    }

    #[test]
    fn presence_registrations_are_independent() {
        let (gateway, mut link) = Gateway::new(16);
        let a = gateway.subscribe_presence(vec!["alice".into()]).unwrap();
        gateway.track_presence(a, PresenceStatus::Online).unwrap();
        let b = gateway.subscribe_presence(vec!["bob".into(), "alice".into()]).unwrap();
        gateway.track_presence(b, PresenceStatus::Away).unwrap();
        assert_eq!(
            drain(&mut link),
            vec![
                GatewayCommand::PresenceSubscribe { keys: vec!["alice".into()] },
                GatewayCommand::PresenceTrack { status: PresenceStatus::Online },
                GatewayCommand::PresenceSubscribe {
                    keys: vec!["alice".into(), "bob".into()]
                },
                GatewayCommand::PresenceTrack { status: PresenceStatus::Away },
            ]
        );

        // Dropping the older watch keeps the other one subscribed.
        gateway.unsubscribe_presence(a).unwrap();
        assert_eq!(
            drain(&mut link),
            vec![GatewayCommand::PresenceSubscribe {
                keys: vec!["bob".into(), "alice".into()]
            }]
        );
        assert_eq!(
            gateway.replay_commands(),
            vec![
                GatewayCommand::PresenceSubscribe {
                    keys: vec!["bob".into(), "alice".into()]
                },
                GatewayCommand::PresenceTrack { status: PresenceStatus::Away },
            ]
        );

        gateway.unsubscribe_presence(b).unwrap();
        gateway.unsubscribe_presence(b).unwrap();
        assert_eq!(
            drain(&mut link),
            vec![GatewayCommand::PresenceUntrack, GatewayCommand::PresenceUnsubscribe]
        );
        assert!(gateway.replay_commands().is_empty());
    }

    #[tokio::test]
    async fn command_stream_ends_with_the_last_handle() {
        let (gateway, mut link) = Gateway::new(16);
        let other = gateway.clone();
        drop(gateway);
        assert!(link.gateway().is_some());
        other.send(GatewayCommand::PresenceUntrack).unwrap();
        drop(other);

        assert!(link.gateway().is_none());
        assert!(!link.deliver(GatewayEvent::PresenceJoin { key: "u2".into() }));
        assert_eq!(link.commands.recv().await, Some(GatewayCommand::PresenceUntrack));
        assert_eq!(link.commands.recv().await, None);
    }

    #[test]
    fn send_fails_once_the_transport_is_gone() {
        let (gateway, link) = Gateway::new(16);
        drop(link);
        assert!(matches!(
            gateway.send(GatewayCommand::PresenceUntrack),
            Err(SyncError::ChannelClosed)
        ));
    }
}
