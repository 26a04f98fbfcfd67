//! Actor health, death and respawn

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::net::{Authority, Replicated, Versioned};
use crate::util::time::Countdown;

use super::physics::HitVolume;
use super::{ActorId, Pose, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    Alive,
    /// Health reached zero, death not yet processed
    Dying,
    Dead,
    /// Respawn timer expired, waiting to be placed
    RespawnPending,
}

/// Replicated part of an actor, written only by the actor's own peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSync {
    pub health: f32,
    pub last_damaging: Option<ActorId>,
    pub position: Vec3,
}

/// Why `apply_damage` left health untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageRejection {
    /// Evaluated on a peer that does not represent the actor
    NotAuthoritative,
    /// Already at zero health or not alive
    NotAlive,
    /// Zero or negative amount
    NoDamage,
    /// The hit landed on an earlier life
    StaleLife,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DamageOutcome {
    Rejected(DamageRejection),
    Applied {
        remaining: f32,
        update: Option<Versioned<ActorSync>>,
    },
    /// Health reached zero: the actor is now `Dying`
    Lethal { update: Option<Versioned<ActorSync>> },
}

#[derive(Debug, Clone)]
pub struct CombatActor {
    id: ActorId,
    team: TeamId,
    max_health: f32,
    sync: Replicated<ActorSync>,
    life_state: LifeState,
    /// Incremented on every respawn
    life: u32,
    respawn: Countdown,
    /// Observers hide a dead actor's hit volume
    hit_volume_visible: bool,
    movement_enabled: bool,
    pickups_enabled: bool,
}

impl CombatActor {
    pub fn new(id: ActorId, team: TeamId, max_health: f32, position: Vec3) -> Self {
        Self {
            id,
            team,
            max_health,
            sync: Replicated::new(ActorSync {
                health: max_health,
                last_damaging: None,
                position,
            }),
            life_state: LifeState::Alive,
            life: 0,
            respawn: Countdown::idle(),
            hit_volume_visible: true,
            movement_enabled: true,
            pickups_enabled: true,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn health(&self) -> f32 {
        self.sync.get().health
    }

    pub fn health_fraction(&self) -> f32 {
        if self.max_health <= 0.0 {
            return 0.0;
        }
        (self.health() / self.max_health).clamp(0.0, 1.0)
    }

    pub fn last_damaging(&self) -> Option<ActorId> {
        self.sync.get().last_damaging
    }

    pub fn position(&self) -> Vec3 {
        self.sync.get().position
    }

    pub fn life_state(&self) -> LifeState {
        self.life_state
    }

    pub fn life(&self) -> u32 {
        self.life
    }

    pub fn is_alive(&self) -> bool {
        self.life_state == LifeState::Alive
    }

    pub fn movement_enabled(&self) -> bool {
        self.movement_enabled
    }

    pub fn pickups_enabled(&self) -> bool {
        self.pickups_enabled
    }

    pub fn respawn_remaining(&self) -> f32 {
        self.respawn.remaining()
    }

    pub fn sync_snapshot(&self) -> Versioned<ActorSync> {
        self.sync.snapshot()
    }

    /// Hit volume for contact tests, absent while hidden
    pub fn hit_volume(&self, height: f32, radius: f32) -> Option<HitVolume> {
        self.hit_volume_visible
            .then(|| HitVolume::new(self.position(), height, radius))
    }

    fn write(&mut self, value: ActorSync) -> Option<Versioned<ActorSync>> {
        // an actor always owns itself
        self.sync.write(Authority::own(self.id), value).ok().flatten()
    }

    /// Apply a hit on the actor's own peer. `life` is the counter the shooter
    /// saw, when known.
    pub fn apply_damage(
        &mut self,
        local: ActorId,
        amount: f32,
        source: Option<ActorId>,
        life: Option<u32>,
    ) -> DamageOutcome {
        if local != self.id {
            warn!(actor = %self.id, local = %local, "Damage evaluated off the actor's own peer");
            return DamageOutcome::Rejected(DamageRejection::NotAuthoritative);
        }
        if self.life_state != LifeState::Alive || self.health() <= 0.0 {
            return DamageOutcome::Rejected(DamageRejection::NotAlive);
        }
        if life.is_some_and(|life| life != self.life) {
            return DamageOutcome::Rejected(DamageRejection::StaleLife);
        }
        if amount <= 0.0 {
            return DamageOutcome::Rejected(DamageRejection::NoDamage);
        }

        let mut state = self.sync.get().clone();
        state.health -= amount;
        state.last_damaging = source;
        let remaining = state.health;
        let update = self.write(state);

        if remaining <= 0.0 {
            self.life_state = LifeState::Dying;
            return DamageOutcome::Lethal { update };
        }
        DamageOutcome::Applied { remaining, update }
    }

    /// Dying → Dead on the actor's own peer. Held items are dropped by the
    /// caller before this.
    pub fn die(&mut self, respawn_time: f32) -> bool {
        if self.life_state != LifeState::Dying {
            return false;
        }
        self.life_state = LifeState::Dead;
        self.pickups_enabled = false;
        self.movement_enabled = false;
        self.respawn.start(respawn_time);
        info!(actor = %self.id, killer = ?self.last_damaging(), "Actor died");
        true
    }

    /// Advance the respawn timer. Returns true once, when it moves the actor
    /// to `RespawnPending`.
    pub fn tick_respawn(&mut self, dt: f32) -> bool {
        if self.life_state != LifeState::Dead || !self.respawn.tick(dt) {
            return false;
        }
        self.life_state = LifeState::RespawnPending;
        true
    }

    /// Place the actor at `spawn` with full health
    pub fn respawn(&mut self, spawn: Pose) -> Option<Versioned<ActorSync>> {
        self.life_state = LifeState::Alive;
        self.life += 1;
        self.respawn.cancel();
        self.movement_enabled = true;
        self.pickups_enabled = true;
        self.hit_volume_visible = true;
        info!(actor = %self.id, life = self.life, "Actor respawned");
        self.write(ActorSync {
            health: self.max_health,
            last_damaging: None,
            position: spawn.position,
        })
    }

    pub fn move_to(&mut self, position: Vec3) -> Option<Versioned<ActorSync>> {
        if !self.movement_enabled {
            return None;
        }
        let mut state = self.sync.get().clone();
        state.position = position;
        self.write(state)
    }

    /// Remote apply of the replicated fields
    pub fn observe(&mut self, update: &Versioned<ActorSync>) -> bool {
        self.sync.observe(update).is_some()
    }

    /// Death notification from the actor's peer
    pub fn observe_death(&mut self) {
        self.hit_volume_visible = false;
        if self.life_state == LifeState::Alive || self.life_state == LifeState::Dying {
            self.life_state = LifeState::Dead;
        }
    }

    /// Respawn notification from the actor's peer
    pub fn observe_respawn(&mut self, position: Vec3, life: u32) {
        self.hit_volume_visible = true;
        self.life_state = LifeState::Alive;
        self.life = self.life.max(life);
        let mut state = self.sync.get().clone();
        state.position = position;
        state.health = self.max_health;
        self.sync.assign_quiet(state);
    }

    /// Match over: free to walk around the lobby again
    pub fn deactivate(&mut self) {
        self.respawn.cancel();
        self.movement_enabled = true;
        self.pickups_enabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: ActorId = ActorId(1);
    const SHOOTER: ActorId = ActorId(2);

    fn actor() -> CombatActor {
        CombatActor::new(ME, TeamId(0), 100.0, Vec3::ZERO)
    }

    #[test]
    fn test_damage_then_death_then_noops() {
        let mut actor = actor();

        assert!(matches!(
            actor.apply_damage(ME, 40.0, Some(SHOOTER), None),
            DamageOutcome::Applied { remaining, .. } if remaining == 60.0
        ));
        assert!(matches!(
            actor.apply_damage(ME, 40.0, Some(SHOOTER), None),
            DamageOutcome::Applied { remaining, .. } if remaining == 20.0
        ));
        assert!(matches!(
            actor.apply_damage(ME, 30.0, Some(SHOOTER), None),
            DamageOutcome::Lethal { .. }
        ));
        assert_eq!(actor.life_state(), LifeState::Dying);
        assert_eq!(actor.last_damaging(), Some(SHOOTER));

        assert!(actor.die(3.0));
        assert_eq!(actor.life_state(), LifeState::Dead);
        assert!(!actor.movement_enabled());
        assert!(!actor.pickups_enabled());

        let health = actor.health();
        assert_eq!(
            actor.apply_damage(ME, 10.0, Some(SHOOTER), None),
            DamageOutcome::Rejected(DamageRejection::NotAlive)
        );

        assert!(actor.tick_respawn(5.0));
        assert_eq!(actor.life_state(), LifeState::RespawnPending);
        assert_eq!(
            actor.apply_damage(ME, 10.0, Some(SHOOTER), None),
            DamageOutcome::Rejected(DamageRejection::NotAlive)
        );
        assert_eq!(actor.health(), health);
    }

    #[test]
    fn test_respawn_restores_health_and_bumps_life() {
        let mut actor = actor();
        actor.apply_damage(ME, 150.0, Some(SHOOTER), None);
        actor.die(1.0);
        assert!(!actor.tick_respawn(0.5));
        assert!(actor.tick_respawn(0.5));
        assert!(!actor.tick_respawn(0.5));

        let spawn = Pose::at(Vec3::new(4.0, 0.0, -40.0));
        let update = actor.respawn(spawn).unwrap();
        assert_eq!(update.value.health, 100.0);
        assert_eq!(actor.position(), spawn.position);
        assert_eq!(actor.life(), 1);
        assert!(actor.is_alive());
        assert!(actor.movement_enabled());
    }

    #[test]
    fn test_only_own_peer_applies_damage() {
        let mut actor = actor();
        assert_eq!(
            actor.apply_damage(SHOOTER, 10.0, Some(SHOOTER), None),
            DamageOutcome::Rejected(DamageRejection::NotAuthoritative)
        );
        assert_eq!(actor.health(), 100.0);
    }

    #[test]
    fn test_hit_from_previous_life_is_ignored() {
        let mut actor = actor();
        actor.respawn(Pose::default());
        assert_eq!(
            actor.apply_damage(ME, 10.0, Some(SHOOTER), Some(0)),
            DamageOutcome::Rejected(DamageRejection::StaleLife)
        );
        assert!(matches!(
            actor.apply_damage(ME, 10.0, Some(SHOOTER), Some(1)),
            DamageOutcome::Applied { .. }
        ));
    }

    #[test]
    fn test_zero_damage_changes_nothing() {
        let mut actor = actor();
        assert_eq!(
            actor.apply_damage(ME, 0.0, Some(SHOOTER), None),
            DamageOutcome::Rejected(DamageRejection::NoDamage)
        );
        assert_eq!(actor.sync_snapshot().version, 0);
    }

    #[test]
    fn test_immobilized_actor_does_not_move() {
        let mut actor = actor();
        actor.apply_damage(ME, 100.0, None, None);
        actor.die(1.0);
        assert!(actor.move_to(Vec3::ONE).is_none());
        assert_eq!(actor.position(), Vec3::ZERO);
    }

    #[test]
    fn test_observers_hide_dead_hit_volume() {
        let mut replica = actor();
        assert!(replica.hit_volume(1.7, 0.35).is_some());
        replica.observe_death();
        assert!(replica.hit_volume(1.7, 0.35).is_none());
        replica.observe_respawn(Vec3::X, 1);
        assert!(replica.hit_volume(1.7, 0.35).is_some());
        assert_eq!(replica.life(), 1);
    }
}
