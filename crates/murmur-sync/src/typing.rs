//! Typing indicators: the local debouncer that emits start/stop signals and
//! the roster of remote typists for one room.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{trace, warn};

use murmur_types::events::GatewayCommand;

use crate::gateway::Gateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Active,
}

/// Per-room `Idle -> Active -> Idle` machine for the local user.
///
/// Emits exactly one `TypingStart` when a burst begins and one `TypingStop`
/// when it ends. Every (re)arm bumps `generation`; a timer that wakes up
/// with a stale generation does nothing.
#[derive(Clone)]
pub struct TypingDebouncer {
    inner: Arc<DebouncerInner>,
}

struct DebouncerInner {
    room_id: String,
    display_name: String,
    silence: Duration,
    gateway: Gateway,
    machine: Mutex<Machine>,
}

struct Machine {
    state: TypingState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl TypingDebouncer {
    pub fn new(
        room_id: impl Into<String>,
        display_name: impl Into<String>,
        silence: Duration,
        gateway: Gateway,
    ) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                room_id: room_id.into(),
                display_name: display_name.into(),
                silence,
                gateway,
                machine: Mutex::new(Machine {
                    state: TypingState::Idle,
                    generation: 0,
                    timer: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> TypingState {
        self.inner.machine.lock().state
    }

    /// Local keystroke. Must be called from within a Tokio runtime.
    pub fn trigger(&self) {
        let mut machine = self.inner.machine.lock();
        if machine.state == TypingState::Idle {
            machine.state = TypingState::Active;
            self.inner.emit(GatewayCommand::TypingStart {
                room_id: self.inner.room_id.clone(),
                display_name: self.inner.display_name.clone(),
            });
        }
        self.arm(&mut machine, self.inner.silence);
    }

    /// End the burst after `delay`. A zero delay stops right away.
    /// A `trigger` during the delay keeps the burst alive.
    pub fn cancel(&self, delay: Duration) {
        let mut machine = self.inner.machine.lock();
        if machine.state == TypingState::Idle {
            return;
        }
        if delay.is_zero() {
            self.inner.finish(&mut machine);
        } else {
            self.arm(&mut machine, delay);
        }
    }

    /// Abort timers; emits the stop signal if a burst is in progress.
    pub fn shutdown(&self) {
        let mut machine = self.inner.machine.lock();
        if machine.state == TypingState::Active {
            self.inner.finish(&mut machine);
        } else if let Some(timer) = machine.timer.take() {
            timer.abort();
        }
    }

    fn arm(&self, machine: &mut Machine, after: Duration) {
        machine.generation += 1;
        if let Some(timer) = machine.timer.take() {
            timer.abort();
        }
        let generation = machine.generation;
        let inner: Weak<DebouncerInner> = Arc::downgrade(&self.inner);
        machine.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(generation);
            }
        }));
    }
}

impl DebouncerInner {
    fn expire(&self, generation: u64) {
        let mut machine = self.machine.lock();
        if machine.generation != generation || machine.state == TypingState::Idle {
            return;
        }
        // We are running inside that timer; just forget its handle.
        machine.timer = None;
        self.finish(&mut machine);
    }

    fn finish(&self, machine: &mut Machine) {
        machine.state = TypingState::Idle;
        machine.generation += 1;
        if let Some(timer) = machine.timer.take() {
            timer.abort();
        }
        self.emit(GatewayCommand::TypingStop {
            room_id: self.room_id.clone(),
        });
    }

    fn emit(&self, command: GatewayCommand) {
        trace!(room_id = %self.room_id, ?command, "typing signal");
        if let Err(e) = self.gateway.send(command) {
            warn!(room_id = %self.room_id, "typing signal dropped: {}", e);
        }
    }
}

impl Drop for DebouncerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.machine.get_mut().timer.take() {
            timer.abort();
        }
    }
}

/// Remote typists of one room, in the order they started typing.
///
/// Each entry expires `ttl` after its last "started" so a lost "stopped"
/// cannot pin an indicator.
#[derive(Debug)]
pub struct TypingRoster {
    ttl: Duration,
    typists: Vec<(String, Instant)>,
}

impl TypingRoster {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            typists: Vec::new(),
        }
    }

    /// Returns true if `name` was not listed yet.
    pub fn start(&mut self, name: &str, now: Instant) -> bool {
        self.prune(now);
        match self.typists.iter_mut().find(|(n, _)| n == name) {
            Some((_, seen)) => {
                *seen = now;
                false
            }
            None => {
                self.typists.push((name.to_string(), now));
                true
            }
        }
    }

    /// Remove one typist, or everyone when `name` is `None`. Returns how many left.
    pub fn stop(&mut self, name: Option<&str>) -> usize {
        let before = self.typists.len();
        match name {
            Some(name) => self.typists.retain(|(n, _)| n != name),
            None => self.typists.clear(),
        }
        before - self.typists.len()
    }

    pub fn active_at(&mut self, now: Instant) -> Vec<String> {
        self.prune(now);
        self.typists.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn active(&mut self) -> Vec<String> {
        self.active_at(Instant::now())
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.typists
            .retain(|(_, seen)| now.saturating_duration_since(*seen) < ttl);
    }
}
