//! Sliding-window gate on outgoing sends.
//!
//! Keeps the timestamps of accepted sends inside the window. A call is
//! accepted while fewer than `max` sends remain after pruning. Rejected
//! calls leave no trace.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimiter {
    window: Duration,
    max: usize,
    /// Accepted send times, oldest first.
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        RateLimiter {
            window,
            max,
            sent: VecDeque::with_capacity(max),
        }
    }

    /// Try to take a slot now. Returns false if the caller must not send.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.sent.len() < self.max {
            self.sent.push_back(now);
            true
        } else {
            false
        }
    }

    /// Free slots at `now`.
    pub fn remaining_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max - self.sent.len()
    }

    pub fn remaining(&mut self) -> usize {
        self.remaining_at(Instant::now())
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.sent.front() {
            if now.saturating_duration_since(front) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
