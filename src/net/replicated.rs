//! Single-writer replicated values with change-triggered notification

use serde::{Deserialize, Serialize};

use crate::game::ActorId;

/// A value stamped with the writer's version counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// The evaluating peer and the current owner of the object it wants to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    pub writer: ActorId,
    pub owner: Option<ActorId>,
}

impl Authority {
    pub fn new(writer: ActorId, owner: Option<ActorId>) -> Self {
        Self { writer, owner }
    }

    /// Authority of an actor over itself
    pub fn own(actor: ActorId) -> Self {
        Self::new(actor, Some(actor))
    }

    pub fn is_owner(&self) -> bool {
        self.owner == Some(self.writer)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    #[error("{writer} tried to write a field owned by {owner:?}")]
    NotOwner {
        writer: ActorId,
        owner: Option<ActorId>,
    },
}

/// A replicated field.
///
/// Only the current owner may `write`. Remote peers feed incoming updates to
/// `observe`, which ignores stale or duplicated versions and only reports a
/// value that differs from the one already held.
#[derive(Debug, Clone, PartialEq)]
pub struct Replicated<T> {
    value: T,
    version: u64,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(value: T) -> Self {
        Self { value, version: 0 }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Owner-side write. Returns the update to send when the value changed,
    /// `None` when it was already equal.
    pub fn write(&mut self, auth: Authority, value: T) -> Result<Option<Versioned<T>>, ReplicationError> {
        if !auth.is_owner() {
            return Err(ReplicationError::NotOwner {
                writer: auth.writer,
                owner: auth.owner,
            });
        }

        if self.value == value {
            return Ok(None);
        }

        self.value = value;
        self.version += 1;
        Ok(Some(self.snapshot()))
    }

    /// Remote-side apply. Returns the new value only when it actually changed.
    pub fn observe(&mut self, update: &Versioned<T>) -> Option<&T> {
        if update.version <= self.version {
            return None;
        }

        self.version = update.version;
        if self.value == update.value {
            return None;
        }

        self.value = update.value.clone();
        Some(&self.value)
    }

    /// Overwrite without notification or version change. Used when a value
    /// arrives through a broadcast event instead of field replication.
    pub fn assign_quiet(&mut self, value: T) {
        self.value = value;
    }

    /// Current value with its version, for a serialization request
    pub fn snapshot(&self) -> Versioned<T> {
        Versioned {
            version: self.version,
            value: self.value.clone(),
        }
    }
}
