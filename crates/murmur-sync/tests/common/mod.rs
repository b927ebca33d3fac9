#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedReceiver;

use murmur_sync::{Gateway, GatewayLink, MessageBackend, Result, SyncConfig, SyncError, SyncSession};
use murmur_types::api::PersistResponse;
use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::{ContentType, Message, Reactions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Insert,
    Edit,
    Delete,
    AddReaction,
    RemoveReaction,
    History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    /// Message id, or temp id for inserts, or room id for history.
    pub target: String,
}

#[derive(Default)]
struct State {
    next_id: u64,
    calls: Vec<Call>,
    failing: HashSet<Op>,
    gated: HashSet<Op>,
    history: Vec<Message>,
    inserted: Vec<Message>,
    omit_insert_id: bool,
}

/// In-memory backend. Gated operations block until [`MockBackend::release`];
/// failing operations answer with a backend error.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    gate: Arc<Semaphore>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().failing.insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.state.lock().failing.remove(&op);
    }

    pub fn hold(&self, op: Op) {
        self.state.lock().gated.insert(op);
    }

    /// Let one gated call through.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Answer inserts with a body that carries no server id.
    pub fn omit_insert_id(&self) {
        self.state.lock().omit_insert_id = true;
    }

    pub fn set_history(&self, messages: Vec<Message>) {
        self.state.lock().history = messages;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Server copies handed out by inserts, in call order.
    pub fn inserted(&self) -> Vec<Message> {
        self.state.lock().inserted.clone()
    }

    /// Wait (on the paused clock) until `n` calls of `op` were made.
    pub async fn wait_for(&self, op: Op, n: usize) {
        for _ in 0..1000 {
            if self.count(op) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("backend never saw {} {:?} calls", n, op);
    }

    async fn enter(&self, op: Op, target: &str) -> Result<()> {
        let gated = {
            let mut state = self.state.lock();
            state.calls.push(Call {
                op,
                target: target.to_string(),
            });
            state.gated.contains(&op)
        };
        if gated {
            self.gate
                .acquire()
                .await
                .map_err(|_| SyncError::Backend("gate closed".into()))?
                .forget();
        }
        if self.state.lock().failing.contains(&op) {
            return Err(SyncError::Backend(format!("{:?} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBackend for MockBackend {
    async fn insert_message(&self, message: &Message) -> Result<PersistResponse> {
        let temp_id = message.temp_id.clone().unwrap_or_default();
        self.enter(Op::Insert, &temp_id).await?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let server = server_copy(message, &format!("srv-{}", state.next_id));
        state.inserted.push(server.clone());
        if state.omit_insert_id {
            let mut body = server;
            body.id = None;
            return Ok(PersistResponse::ok(Some(body)));
        }
        Ok(PersistResponse::ok(Some(server)))
    }

    async fn edit_message(&self, id: &str, _content: &str) -> Result<PersistResponse> {
        self.enter(Op::Edit, id).await?;
        Ok(PersistResponse::ok(None))
    }

    async fn delete_message(
        &self,
        id: &str,
        _content_type: ContentType,
        _content: &str,
    ) -> Result<PersistResponse> {
        self.enter(Op::Delete, id).await?;
        Ok(PersistResponse::ok(None))
    }

    async fn add_reaction(&self, id: &str, _user_id: &str, _emoji: &str) -> Result<PersistResponse> {
        self.enter(Op::AddReaction, id).await?;
        Ok(PersistResponse::ok(None))
    }

    async fn remove_reaction(&self, id: &str, _user_id: &str, _emoji: &str) -> Result<PersistResponse> {
        self.enter(Op::RemoveReaction, id).await?;
        Ok(PersistResponse::ok(None))
    }

    async fn fetch_history(
        &self,
        room_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.enter(Op::History, room_id).await?;
        let state = self.state.lock();
        let mut older: Vec<Message> = state
            .history
            .iter()
            .filter(|m| m.room_id == room_id && before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        older.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        older.truncate(limit as usize);
        Ok(older)
    }
}

/// What the server would store and broadcast for a local send.
pub fn server_copy(message: &Message, id: &str) -> Message {
    let mut server = message.clone();
    server.id = Some(id.to_string());
    server.delivery_status = None;
    server
}

pub fn peer_message(room_id: &str, sender: &str, id: &str, content: &str, created_at: DateTime<Utc>) -> Message {
    Message {
        id: Some(id.to_string()),
        temp_id: None,
        room_id: room_id.to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        content_type: ContentType::Text,
        created_at,
        edited: false,
        reply_to: None,
        reactions: Reactions::default(),
        delivery_status: None,
    }
}

pub struct Harness {
    pub session: SyncSession,
    pub gateway: Gateway,
    pub link: GatewayLink,
    pub backend: MockBackend,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let (gateway, link) = Gateway::new(config.event_buffer);
        let backend = MockBackend::new();
        let session = SyncSession::builder()
            .user_id("me")
            .display_name("Me")
            .config(config)
            .gateway(gateway.clone())
            .backend(backend.clone())
            .build()
            .expect("session");
        Self {
            session,
            gateway,
            link,
            backend,
        }
    }

    pub fn push(&self, event: GatewayEvent) {
        self.gateway.deliver(event);
    }

    pub fn commands(&mut self) -> Vec<GatewayCommand> {
        drain(&mut self.link.commands)
    }
}

pub fn drain(rx: &mut UnboundedReceiver<GatewayCommand>) -> Vec<GatewayCommand> {
    let mut out = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        out.push(cmd);
    }
    out
}

/// Let spawned router tasks run (auto-advances a paused clock).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
