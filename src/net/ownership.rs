//! Per-object write authority

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::game::{ActorId, TeamId, WeaponId};

/// Objects that carry an ownership token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "object", content = "id", rename_all = "snake_case")]
pub enum NetObject {
    /// The combat controller of an actor; always owned by that actor
    Actor(ActorId),
    Weapon(WeaponId),
    Flag(TeamId),
    /// The match-state object holding team scores
    Match,
}

/// A peer's view of who owns what
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    owners: HashMap<NetObject, ActorId>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, object: NetObject) -> Option<ActorId> {
        match object {
            NetObject::Actor(actor) => Some(actor),
            _ => self.owners.get(&object).copied(),
        }
    }

    pub fn is_owner(&self, actor: ActorId, object: NetObject) -> bool {
        self.owner_of(object) == Some(actor)
    }

    /// Apply a transfer. Returns true when the owner changed.
    pub fn set_owner(&mut self, object: NetObject, owner: ActorId) -> bool {
        if let NetObject::Actor(_) = object {
            return false;
        }
        self.owners.insert(object, owner) != Some(owner)
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }
}
