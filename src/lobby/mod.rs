//! Lobby roster and player-slot bookkeeping

use std::time::Instant;

use serde::Serialize;

use crate::game::{ActorId, TeamId};

/// A seated player
#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub index: usize,
    pub actor: ActorId,
    pub team: TeamId,
    pub name: String,
    #[serde(skip)]
    pub joined_at: Instant,
}

/// Immutable seating handed to every peer at match start
#[derive(Debug, Clone, Default)]
pub struct Roster {
    slots: Vec<Slot>,
    num_teams: usize,
}

impl Roster {
    pub fn new(mut slots: Vec<Slot>, num_teams: usize) -> Self {
        slots.sort_by_key(|s| s.index);
        Self { slots, num_teams }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn num_teams(&self) -> usize {
        self.num_teams
    }

    pub fn team_of(&self, actor: ActorId) -> Option<TeamId> {
        self.slots.iter().find(|s| s.actor == actor).map(|s| s.team)
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.slots.iter().any(|s| s.actor == actor)
    }

    /// The lowest seated slot owns the match object
    pub fn master(&self) -> Option<ActorId> {
        self.slots.first().map(|s| s.actor)
    }

    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.slots.iter().map(|s| s.actor)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Callback into whatever hosts the match
pub trait Lobby: Send + Sync {
    /// The match finished; tear the session down
    fn end_session(&self);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby is full ({0} players)")]
    Full(usize),

    #[error("{0} is not seated")]
    NotSeated(ActorId),

    #[error("Seating is closed while a match runs")]
    MatchRunning,

    #[error("Only the master seat can start a match")]
    NotMaster,
}

/// Seats players into a fixed number of slots. Teams are assigned
/// round-robin by slot index.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<Slot>>,
    num_teams: usize,
    next_actor: u32,
}

impl SlotTable {
    pub fn new(max_players: usize, num_teams: usize) -> Self {
        Self {
            slots: vec![None; max_players.max(1)],
            num_teams: num_teams.max(1),
            next_actor: 1,
        }
    }

    /// Seat a player in the first free slot
    pub fn join(&mut self, name: impl Into<String>) -> Result<Slot, LobbyError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(LobbyError::Full(self.slots.len()))?;

        let actor = ActorId(self.next_actor);
        self.next_actor += 1;

        let slot = Slot {
            index,
            actor,
            team: TeamId((index % self.num_teams) as u8),
            name: name.into(),
            joined_at: Instant::now(),
        };
        self.slots[index] = Some(slot.clone());
        Ok(slot)
    }

    pub fn leave(&mut self, actor: ActorId) -> Result<Slot, LobbyError> {
        self.slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|s| s.actor == actor))
            .and_then(Option::take)
            .ok_or(LobbyError::NotSeated(actor))
    }

    pub fn get(&self, actor: ActorId) -> Option<&Slot> {
        self.slots.iter().flatten().find(|s| s.actor == actor)
    }

    pub fn seated(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.slots.iter().flatten().cloned().collect(), self.num_teams)
    }
}
