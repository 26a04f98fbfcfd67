//! Flag carry, drop, reset and capture

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::net::{Authority, Replicated, ReplicationError, Versioned};
use crate::util::time::Countdown;

use super::arena::StandSpec;
use super::physics::is_within;
use super::{Holder, Pose, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagState {
    AtStand,
    Carried,
    Dropped,
    Captured,
}

/// Replicated part of a flag, written by the flag's current owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSync {
    pub holder: Option<Holder>,
    pub state: FlagState,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickupOutcome {
    /// Picker was out of reach, the flag stays where it was
    OutOfReach,
    /// The flag's own team touched it: straight back to the stand
    Returned(Option<Versioned<FlagSync>>),
    /// An enemy is now carrying it
    Taken(Option<Versioned<FlagSync>>),
}

#[derive(Debug, Clone)]
pub struct Flag {
    team: TeamId,
    home: Pose,
    sync: Replicated<FlagSync>,
    reset: Countdown,
    /// Members of the flag's own team may not pick it up while set
    same_team_locked: bool,
    enabled: bool,
}

impl Flag {
    pub fn new(stand: &StandSpec) -> Self {
        Self {
            team: stand.team,
            home: stand.home,
            sync: Replicated::new(Self::home_state(stand.home)),
            reset: Countdown::idle(),
            same_team_locked: true,
            enabled: true,
        }
    }

    fn home_state(home: Pose) -> FlagSync {
        FlagSync {
            holder: None,
            state: FlagState::AtStand,
            position: home.position,
        }
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn state(&self) -> FlagState {
        self.sync.get().state
    }

    pub fn holder(&self) -> Option<Holder> {
        self.sync.get().holder
    }

    pub fn position(&self) -> Vec3 {
        self.sync.get().position
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_same_team_locked(&self) -> bool {
        self.same_team_locked
    }

    pub fn is_resetting(&self) -> bool {
        self.reset.is_running()
    }

    pub fn sync_snapshot(&self) -> Versioned<FlagSync> {
        self.sync.snapshot()
    }

    /// Local check before an ownership transfer is requested
    pub fn can_pick_up(&self, team: TeamId) -> bool {
        self.enabled
            && self.holder().is_none()
            && self.state() != FlagState::Captured
            && !(self.same_team_locked && team == self.team)
    }

    pub fn in_reach(&self, position: Vec3, proximity: f32) -> bool {
        is_within(position, self.position(), proximity)
    }

    /// Owner-side pickup, after ownership moved to `holder.actor`. Reach is
    /// checked again here.
    pub fn pick_up(
        &mut self,
        auth: Authority,
        holder: Holder,
        holder_team: TeamId,
        holder_position: Vec3,
        proximity: f32,
    ) -> Result<PickupOutcome, ReplicationError> {
        if !self.in_reach(holder_position, proximity) {
            debug!(flag = %self.team, actor = %holder.actor, "Flag pickup out of reach");
            return Ok(PickupOutcome::OutOfReach);
        }

        if holder_team == self.team {
            info!(flag = %self.team, actor = %holder.actor, "Flag returned by its own team");
            return Ok(PickupOutcome::Returned(self.return_home(auth)?));
        }

        let update = self.sync.write(
            auth,
            FlagSync {
                holder: Some(holder),
                state: FlagState::Carried,
                position: holder_position,
            },
        )?;
        self.reset.cancel();
        info!(flag = %self.team, actor = %holder.actor, "Flag taken");
        Ok(PickupOutcome::Taken(update))
    }

    /// The carrier moved
    pub fn carry_to(&mut self, auth: Authority, position: Vec3) -> Result<Option<Versioned<FlagSync>>, ReplicationError> {
        if self.state() != FlagState::Carried {
            return Ok(None);
        }
        let mut state = self.sync.get().clone();
        state.position = position;
        self.sync.write(auth, state)
    }

    /// Voluntary or forced drop at `position`; starts the reset countdown
    pub fn drop_at(
        &mut self,
        auth: Authority,
        position: Vec3,
        reset_time: f32,
    ) -> Result<Option<Versioned<FlagSync>>, ReplicationError> {
        let update = self.sync.write(
            auth,
            FlagSync {
                holder: None,
                state: FlagState::Dropped,
                position,
            },
        )?;
        self.reset.start(reset_time);
        info!(flag = %self.team, "Flag dropped");
        Ok(update)
    }

    /// Newly owned while dropped or captured: restart the countdown home
    pub fn adopt(&mut self, reset_time: f32) {
        if self.reset.is_running() {
            return;
        }
        match self.state() {
            FlagState::Dropped => self.reset.start(reset_time),
            FlagState::Captured => self.reset.start(0.0),
            FlagState::AtStand | FlagState::Carried => {}
        }
    }

    pub fn return_home(&mut self, auth: Authority) -> Result<Option<Versioned<FlagSync>>, ReplicationError> {
        let update = self.sync.write(auth, Self::home_state(self.home))?;
        self.reset.cancel();
        Ok(update)
    }

    /// Owner-side: a dropped or captured flag goes home when its countdown
    /// expires
    pub fn tick_reset(&mut self, auth: Authority, dt: f32) -> Result<Option<Versioned<FlagSync>>, ReplicationError> {
        if !self.reset.tick(dt) {
            return Ok(None);
        }
        debug!(flag = %self.team, "Flag reset timer expired");
        self.return_home(auth)
    }

    /// Whether this flag is being carried inside an enemy stand's capture
    /// volume
    pub fn in_capture_volume(&self, stand: &StandSpec) -> bool {
        self.enabled
            && stand.team != self.team
            && self.state() == FlagState::Carried
            && is_within(self.position(), stand.home.position, stand.capture_radius)
    }

    /// Captured at its stand for one tick; the next `tick_reset` sends it
    /// back to `AtStand`
    pub fn capture(&mut self, auth: Authority, stand: TeamId) -> Result<Option<Versioned<FlagSync>>, ReplicationError> {
        let update = self.sync.write(
            auth,
            FlagSync {
                holder: None,
                state: FlagState::Captured,
                position: self.home.position,
            },
        )?;
        self.reset.start(0.0);
        info!(flag = %self.team, stand = %stand, "Flag captured");
        Ok(update)
    }

    pub fn set_same_team_lock(&mut self, locked: bool) {
        self.same_team_locked = locked;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn observe(&mut self, update: &Versioned<FlagSync>) -> bool {
        self.sync.observe(update).is_some()
    }

    pub fn reset_for_match(&mut self) {
        self.sync.assign_quiet(Self::home_state(self.home));
        self.reset.cancel();
        self.same_team_locked = true;
        self.enabled = true;
    }
}
