//! Combat and objective simulation modules

pub mod arena;
pub mod flag;
pub mod health;
pub mod hit;
pub mod hud;
pub mod r#match;
pub mod peer;
pub mod physics;
pub mod projectile;
pub mod weapon;

pub use peer::Peer;
pub use r#match::{MatchPhase, MatchResult};

use std::fmt;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Player id as handed out by the lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Team index (0 = Blue, 1 = Red in the default layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u8);

impl TeamId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Index of a weapon placed in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeaponId(pub u16);

impl WeaponId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WeaponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn other(self) -> Self {
        match self {
            Hand::Left => Hand::Right,
            Hand::Right => Hand::Left,
        }
    }
}

/// Who is holding a pickup, and in which hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub actor: ActorId,
    pub hand: Hand,
}

/// Anything an actor can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Item {
    Weapon(WeaponId),
    /// A flag is identified by the team it belongs to
    Flag(TeamId),
}

/// Position and orientation in world space. Forward is +Z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Local input for the actor a peer represents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PeerCommand {
    /// Move the actor (ignored while immobilized)
    Move { position: Vec3 },
    /// Point the weapon in `hand` along `direction` from `origin`
    Aim {
        hand: Hand,
        origin: Vec3,
        direction: Vec3,
    },
    Trigger { hand: Hand, down: bool },
    Reload { hand: Hand },
    Pickup { item: Item, hand: Hand },
    Drop { hand: Hand },
}

/// Rejected local commands
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("No match is running")]
    NotRunning,

    #[error("Unknown item {0:?}")]
    UnknownItem(Item),

    #[error("Pickups are disabled for {0}")]
    PickupsDisabled(ActorId),

    #[error("{0:?} hand is already holding something")]
    HandOccupied(Hand),

    #[error("{0:?} cannot be picked up right now")]
    NotPickupable(Item),

    #[error("{0:?} is out of reach")]
    OutOfReach(Item),

    #[error("Nothing held in {0:?} hand")]
    NothingHeld(Hand),

    #[error("{0} is immobilized")]
    Immobilized(ActorId),
}
