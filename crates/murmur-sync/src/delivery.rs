//! Bookkeeping for outgoing messages between the optimistic insert and the
//! persistence outcome.
//!
//! `Pending -> (reconciled, entry dropped)` or `Pending -> Failed -> Pending`
//! through a user retry. There is no automatic retry and no client timeout.

use std::collections::HashMap;

use murmur_types::Draft;
use uuid::Uuid;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEntry {
    pub temp_id: String,
    pub room_id: String,
    /// 1 for the first submission, bumped on each retry.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub state: DeliveryState,
    /// Kept so a retry resubmits without retyping.
    pub draft: Draft,
}

/// Allocate a locally unique placeholder id.
pub fn new_temp_id() -> String {
    format!("tmp-{}", Uuid::new_v4())
}

#[derive(Debug, Default)]
pub struct DeliveryTracker {
    entries: HashMap<String, DeliveryEntry>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, temp_id: &str, room_id: &str, draft: Draft) -> &DeliveryEntry {
        self.entries
            .entry(temp_id.to_string())
            .or_insert_with(|| DeliveryEntry {
                temp_id: temp_id.to_string(),
                room_id: room_id.to_string(),
                attempt: 1,
                last_error: None,
                state: DeliveryState::Pending,
                draft,
            })
    }

    /// `Failed -> Pending`. Only failed entries can be retried.
    pub fn retry(&mut self, temp_id: &str) -> Result<&DeliveryEntry> {
        let entry = self
            .entries
            .get_mut(temp_id)
            .ok_or_else(|| SyncError::NotFound(temp_id.to_string()))?;
        if entry.state != DeliveryState::Failed {
            return Err(SyncError::Validation(format!(
                "{} is still in flight",
                temp_id
            )));
        }
        entry.state = DeliveryState::Pending;
        entry.attempt += 1;
        Ok(entry)
    }

    pub fn fail(&mut self, temp_id: &str, error: impl Into<String>) -> Option<&DeliveryEntry> {
        let entry = self.entries.get_mut(temp_id)?;
        entry.state = DeliveryState::Failed;
        entry.last_error = Some(error.into());
        Some(entry)
    }

    /// The send is reconciled; the entry is destroyed.
    pub fn resolve(&mut self, temp_id: &str) -> Option<DeliveryEntry> {
        self.entries.remove(temp_id)
    }

    /// The user gave up on the send; the entry is destroyed.
    pub fn abandon(&mut self, temp_id: &str) -> Option<DeliveryEntry> {
        self.entries.remove(temp_id)
    }

    pub fn get(&self, temp_id: &str) -> Option<&DeliveryEntry> {
        self.entries.get(temp_id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeliveryEntry> {
        self.entries
            .values()
            .filter(|e| e.state == DeliveryState::Failed)
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == DeliveryState::Pending)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
