//! Wire messages exchanged between peers

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::game::flag::FlagSync;
use crate::game::health::ActorSync;
use crate::game::hit::HitRecord;
use crate::game::weapon::WeaponSync;
use crate::game::{ActorId, TeamId, WeaponId};

use super::ownership::NetObject;
use super::replicated::Versioned;

/// Who receives a broadcast event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Every peer, including the sender
    All,
    /// Every peer except the sender
    Others,
    Peer(ActorId),
}

impl Target {
    pub fn includes(&self, sender: ActorId, receiver: ActorId) -> bool {
        match self {
            Target::All => true,
            Target::Others => sender != receiver,
            Target::Peer(id) => *id == receiver,
        }
    }
}

/// Named events, executed by every receiving peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetEvent {
    /// A trigger pull: every peer spawns the pellets for `weapon`
    SpawnProjectiles {
        weapon: WeaponId,
        origin: Vec3,
        direction: Vec3,
    },
    /// Re-broadcast of a hit on the target already published for `weapon`
    ResolveHit { weapon: WeaponId, record: HitRecord },
    PlayerDied {
        actor: ActorId,
        killer: Option<ActorId>,
    },
    /// `life` counts respawns and keys stale hit records
    PlayerRespawned {
        actor: ActorId,
        position: Vec3,
        life: u32,
    },
    /// Lock or unlock pickup of `flag` by members of its own team
    FlagPickupLock { flag: TeamId, locked: bool },
    /// An enemy flag reached the capture volume of `stand`
    FlagCaptured { stand: TeamId },
    /// The match owner started the end of the match with these final scores
    MatchEnding { scores: Vec<u32> },
}

/// Replicated field updates, sent by the owner of the object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum SyncUpdate {
    WeaponHit {
        weapon: WeaponId,
        target: Versioned<Option<ActorId>>,
        source: Option<ActorId>,
        target_life: u32,
    },
    WeaponState {
        weapon: WeaponId,
        state: Versioned<WeaponSync>,
    },
    ActorState {
        actor: ActorId,
        state: Versioned<ActorSync>,
    },
    FlagState {
        flag: TeamId,
        state: Versioned<FlagSync>,
    },
    Scores { scores: Versioned<Vec<u32>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetMessage {
    Event {
        from: ActorId,
        target: Target,
        event: NetEvent,
    },
    Sync { from: ActorId, update: SyncUpdate },
    Ownership {
        from: ActorId,
        object: NetObject,
        owner: ActorId,
    },
}

impl NetMessage {
    pub fn sender(&self) -> ActorId {
        match self {
            NetMessage::Event { from, .. }
            | NetMessage::Sync { from, .. }
            | NetMessage::Ownership { from, .. } => *from,
        }
    }

    /// Whether `receiver` should get this message. Field updates and
    /// ownership transfers are already applied on the sending peer.
    pub fn is_for(&self, receiver: ActorId) -> bool {
        match self {
            NetMessage::Event { from, target, .. } => target.includes(*from, receiver),
            NetMessage::Sync { from, .. } | NetMessage::Ownership { from, .. } => *from != receiver,
        }
    }
}

/// Messages queued by one peer during a tick
#[derive(Debug)]
pub struct Outbox {
    from: ActorId,
    messages: Vec<NetMessage>,
}

impl Outbox {
    pub fn new(from: ActorId) -> Self {
        Self {
            from,
            messages: Vec::new(),
        }
    }

    pub fn broadcast(&mut self, target: Target, event: NetEvent) {
        self.messages.push(NetMessage::Event {
            from: self.from,
            target,
            event,
        });
    }

    pub fn sync(&mut self, update: SyncUpdate) {
        self.messages.push(NetMessage::Sync {
            from: self.from,
            update,
        });
    }

    pub fn transfer(&mut self, object: NetObject, owner: ActorId) {
        self.messages.push(NetMessage::Ownership {
            from: self.from,
            object,
            owner,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn drain(&mut self) -> Vec<NetMessage> {
        std::mem::take(&mut self.messages)
    }
}
