//! Online/offline state of watched contacts.
//!
//! `PresenceSync` snapshots are authoritative; `PresenceJoin`/`PresenceLeave`
//! are advisory deltas applied only to contacts already being watched, so
//! unrelated global presence never grows the watch set.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_types::events::{GatewayEvent, PresenceStatus};

use crate::error::Result;
use crate::gateway::{Gateway, PresenceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub online: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    /// Watched contacts in the order they were given.
    records: Vec<PresenceRecord>,
}

impl PresenceTracker {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records: Vec<PresenceRecord> = Vec::new();
        for peer in peers {
            let user_id = peer.into();
            if !records.iter().any(|r| r.user_id == user_id) {
                records.push(PresenceRecord {
                    user_id,
                    online: false,
                });
            }
        }
        Self { records }
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.user_id.clone()).collect()
    }

    pub fn is_watched(&self, user_id: &str) -> bool {
        self.records.iter().any(|r| r.user_id == user_id)
    }

    /// `None` for contacts that are not watched.
    pub fn is_online(&self, user_id: &str) -> Option<bool> {
        self.records
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.online)
    }

    pub fn records(&self) -> &[PresenceRecord] {
        &self.records
    }

    pub fn online(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.online)
            .map(|r| r.user_id.clone())
            .collect()
    }

    /// Overwrite every watched contact from the snapshot. Returns how many flipped.
    pub fn sync<'a, I>(&mut self, present: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: HashSet<&str> = present.into_iter().collect();
        let mut changed = 0;
        for record in &mut self.records {
            let online = present.contains(record.user_id.as_str());
            if record.online != online {
                record.online = online;
                changed += 1;
            }
        }
        changed
    }

    /// Returns true if a watched contact changed state.
    pub fn join(&mut self, key: &str) -> bool {
        self.set(key, true)
    }

    pub fn leave(&mut self, key: &str) -> bool {
        self.set(key, false)
    }

    /// Apply a presence event; other events are ignored. Returns true on change.
    pub fn apply(&mut self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::PresenceSync { keys } => self.sync(keys.iter().map(String::as_str)) > 0,
            GatewayEvent::PresenceJoin { key } => self.join(key),
            GatewayEvent::PresenceLeave { key } => self.leave(key),
            _ => false,
        }
    }

    fn set(&mut self, key: &str, online: bool) -> bool {
        match self.records.iter_mut().find(|r| r.user_id == key) {
            Some(record) if record.online != online => {
                record.online = online;
                true
            }
            _ => false,
        }
    }
}

/// Live presence subscription for a set of peers.
///
/// Created by the session. Announces our own status after subscribing and
/// releases its gateway registration on [`PresenceWatch::close`] or drop;
/// the last live watch untracks and unsubscribes. While the gateway is
/// disconnected the last known state is kept.
pub struct PresenceWatch {
    tracker: Arc<Mutex<PresenceTracker>>,
    gateway: Gateway,
    registration: PresenceId,
    task: Option<JoinHandle<()>>,
}

impl PresenceWatch {
    pub(crate) fn start(gateway: Gateway, peers: Vec<String>, status: PresenceStatus) -> Result<Self> {
        let tracker = Arc::new(Mutex::new(PresenceTracker::new(peers)));
        let keys = tracker.lock().keys();

        // Subscribe to the bus first so the answering sync is not missed.
        let mut events = gateway.subscribe();
        let registration = gateway.subscribe_presence(keys.clone())?;
        if let Err(e) = gateway.track_presence(registration, status) {
            let _ = gateway.unsubscribe_presence(registration);
            return Err(e);
        }
        info!(peers = keys.len(), ?status, "presence watch started");

        let shared = tracker.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if shared.lock().apply(&event) {
                            debug!(kind = event.kind(), "presence changed");
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("presence receiver lagged by {} events, waiting for next sync", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            tracker,
            gateway,
            registration,
            task: Some(task),
        })
    }

    pub fn is_online(&self, user_id: &str) -> Option<bool> {
        self.tracker.lock().is_online(user_id)
    }

    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.tracker.lock().records().to_vec()
    }

    pub fn online(&self) -> Vec<String> {
        self.tracker.lock().online()
    }

    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Err(e) = self.gateway.unsubscribe_presence(self.registration) {
            warn!("presence teardown not sent: {}", e);
        }
        info!("presence watch closed");
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        self.teardown();
    }
}
