//! The session context: identity, shared store, rate limiter, gateway
//! handle and persistence backend, built once and handed to every room.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use murmur_types::Message;
use murmur_types::events::PresenceStatus;

use crate::backend::MessageBackend;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::gateway::Gateway;
use crate::presence::PresenceWatch;
use crate::rate_limiter::RateLimiter;
use crate::room::Room;
use crate::store::MessageStore;

const NOTICE_BUFFER: usize = 64;

/// Non-blocking, user-visible failure notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    SendFailed {
        room_id: String,
        temp_id: String,
        error: String,
    },
    EditFailed {
        room_id: String,
        id: String,
        error: String,
    },
    DeleteFailed {
        room_id: String,
        id: String,
        error: String,
    },
    ReactionFailed {
        room_id: String,
        id: String,
        emoji: String,
        error: String,
    },
    HistoryFailed { room_id: String, error: String },
}

impl SyncNotice {
    pub fn room_id(&self) -> &str {
        match self {
            Self::SendFailed { room_id, .. }
            | Self::EditFailed { room_id, .. }
            | Self::DeleteFailed { room_id, .. }
            | Self::ReactionFailed { room_id, .. }
            | Self::HistoryFailed { room_id, .. } => room_id,
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) user_id: String,
    pub(crate) display_name: String,
    pub(crate) config: SyncConfig,
    pub(crate) store: Mutex<MessageStore>,
    pub(crate) limiter: Mutex<RateLimiter>,
    pub(crate) gateway: Gateway,
    pub(crate) backend: Arc<dyn MessageBackend>,
    notices: broadcast::Sender<SyncNotice>,
}

impl SessionInner {
    pub(crate) fn notify(&self, notice: SyncNotice) {
        debug!(?notice, "sync notice");
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }
}

/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }

    pub fn is_open(&self, room_id: &str) -> bool {
        self.inner.store.lock().is_attached(room_id)
    }

    /// Copy of a room's messages; empty if the room is not open.
    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.inner.store.lock().list(room_id).to_vec()
    }

    /// Attach the room's timeline and router. A room can be open only once
    /// per session at a time.
    pub fn open_room(&self, room_id: &str) -> Result<Room> {
        if room_id.trim().is_empty() {
            return Err(SyncError::Validation("room id is empty".into()));
        }
        if !self.inner.store.lock().attach(room_id) {
            return Err(SyncError::Validation(format!("room {} is already open", room_id)));
        }
        match Room::open(self.inner.clone(), room_id) {
            Ok(room) => {
                info!(room_id, user_id = %self.inner.user_id, "room opened");
                Ok(room)
            }
            Err(e) => {
                self.inner.store.lock().detach(room_id);
                Err(e)
            }
        }
    }

    /// Follow the online state of `peers` and announce our own `status`.
    pub fn watch_presence<I, S>(&self, peers: I, status: PresenceStatus) -> Result<PresenceWatch>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers: Vec<String> = peers.into_iter().map(Into::into).collect();
        PresenceWatch::start(self.inner.gateway.clone(), peers, status)
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    user_id: Option<String>,
    display_name: Option<String>,
    config: Option<SyncConfig>,
    gateway: Option<Gateway>,
    backend: Option<Arc<dyn MessageBackend>>,
}

impl SessionBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Shown in typing indicators. Defaults to the user id.
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn backend<B: MessageBackend>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn MessageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<SyncSession> {
        let user_id = self
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SyncError::Config("session needs a user id".into()))?;
        let gateway = self
            .gateway
            .ok_or_else(|| SyncError::Config("session needs a gateway".into()))?;
        let backend = self
            .backend
            .ok_or_else(|| SyncError::Config("session needs a persistence backend".into()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let display_name = self
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user_id.clone());
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);

        Ok(SyncSession {
            inner: Arc::new(SessionInner {
                limiter: Mutex::new(RateLimiter::new(config.rate_window, config.rate_max)),
                user_id,
                display_name,
                config,
                store: Mutex::new(MessageStore::new()),
                gateway,
                backend,
                notices,
            }),
        })
    }
}
