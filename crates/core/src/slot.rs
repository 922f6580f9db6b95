//! Durable key/value slots (cookie-equivalent persistence).
//!
//! A slot holds one string value with an optional expiry. The client keeps
//! the bearer credential and the interface language in slots; anything that
//! must survive a process restart goes through this trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot storage io error: {0}")]
    Io(String),

    #[error("slot storage encoding error: {0}")]
    Encoding(String),

    /// An internal lock was poisoned by a panicking writer.
    #[error("slot storage lock poisoned")]
    Poisoned,
}

/// Persisted form of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SlotEntry {
    pub fn new(value: impl Into<String>, max_age: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: max_age.map(|age| now + age),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Scoped key/value persistence.
///
/// Implementations must make `set` and `remove` visible atomically: a reader
/// never observes a half-written value.
pub trait SlotStore: Send + Sync {
    /// Read a slot. Expired slots read as `None`.
    fn get(&self, key: &str) -> Result<Option<String>, SlotError>;

    /// Write a slot, replacing any previous value.
    ///
    /// `max_age: None` leaves expiry to whoever issued the value.
    fn set(&self, key: &str, value: &str, max_age: Option<Duration>) -> Result<(), SlotError>;

    /// Delete a slot. Removing a missing slot is not an error.
    fn remove(&self, key: &str) -> Result<(), SlotError>;
}

impl<S> SlotStore for Arc<S>
where
    S: SlotStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<String>, SlotError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, max_age: Option<Duration>) -> Result<(), SlotError> {
        (**self).set(key, value, max_age)
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        (**self).remove(key)
    }
}

/// In-memory slot store for tests/dev.
///
/// Cloning shares the underlying map, so a clone handed to a "restarted"
/// component sees what the previous one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySlotStore {
    slots: Arc<Mutex<HashMap<String, SlotEntry>>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) slots.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SlotStore for MemorySlotStore {
    fn get(&self, key: &str) -> Result<Option<String>, SlotError> {
        let mut slots = self.slots.lock().map_err(|_| SlotError::Poisoned)?;
        let now = Utc::now();

        match slots.get(key) {
            Some(entry) if entry.is_expired(now) => {
                slots.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, max_age: Option<Duration>) -> Result<(), SlotError> {
        let mut slots = self.slots.lock().map_err(|_| SlotError::Poisoned)?;
        slots.insert(key.to_string(), SlotEntry::new(value, max_age, Utc::now()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        let mut slots = self.slots.lock().map_err(|_| SlotError::Poisoned)?;
        slots.remove(key);
        Ok(())
    }
}
