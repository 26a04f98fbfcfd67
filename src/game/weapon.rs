//! Weapon fire control - trigger, refire, rechamber, reload, bloom, spread

use std::sync::Arc;

use glam::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WeaponConfig;
use crate::net::{Authority, Replicated, ReplicationError, Versioned};
use crate::util::time::Countdown;

use super::arena::WeaponSlot;
use super::hit::HitChannel;
use super::projectile::ProjectilePool;
use super::{ActorId, Holder, Pose, WeaponId};

/// Replicated pickup state of a weapon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponSync {
    pub holder: Option<Holder>,
    /// Resting pose when nobody holds the weapon
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FireState {
    Idle,
    Firing,
    Rechambering,
    Reloading,
    Dropped,
}

/// Progress of a pending reload after an update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReloadStatus {
    Ready,
    /// Fraction of the reload already done
    Reloading(f32),
    /// The magazine was refilled this update
    Completed,
}

impl ReloadStatus {
    pub fn is_ready(self) -> bool {
        !matches!(self, ReloadStatus::Reloading(_))
    }
}

/// A shot that left the muzzle. Every peer spawns `pellets` projectiles
/// (or hitscan traces) from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub weapon: WeaponId,
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Runtime state of one placed weapon.
///
/// The fire-control timers only advance on the peer that holds the weapon;
/// other replicas only see `WeaponSync` and the spawn events.
#[derive(Debug)]
pub struct Weapon {
    id: WeaponId,
    config: Arc<WeaponConfig>,
    rack: Pose,
    sync: Replicated<WeaponSync>,
    last_holder: Option<ActorId>,

    rounds_left: u32,
    trigger_down: bool,
    is_firing: bool,
    manual_reload: bool,
    is_dual_wielding: bool,
    current_bloom: f32,
    muzzle: Pose,

    refire_timer: f32,
    rechamber_timer: f32,
    reload_timer: f32,
    bloom_delay_timer: f32,
    reset: Countdown,

    pub hits: HitChannel,
    pub projectiles: ProjectilePool,
}

impl Weapon {
    pub fn new(slot: &WeaponSlot) -> Self {
        let config = slot.config.clone();
        // every pellet of a full magazine can be in flight at once
        let pool_size = (config.magazine_size * config.pellet_count.max(1)) as usize;
        Self {
            id: slot.id,
            rack: slot.rack,
            sync: Replicated::new(WeaponSync {
                holder: None,
                pose: slot.rack,
            }),
            last_holder: None,
            rounds_left: config.magazine_size,
            trigger_down: false,
            is_firing: false,
            manual_reload: false,
            is_dual_wielding: false,
            current_bloom: config.min_bloom,
            muzzle: slot.rack,
            refire_timer: 0.0,
            rechamber_timer: 0.0,
            reload_timer: 0.0,
            bloom_delay_timer: 0.0,
            reset: Countdown::idle(),
            hits: HitChannel::new(slot.id),
            projectiles: ProjectilePool::new(slot.id, pool_size),
            config,
        }
    }

    pub fn id(&self) -> WeaponId {
        self.id
    }

    pub fn config(&self) -> &WeaponConfig {
        &self.config
    }

    pub fn holder(&self) -> Option<Holder> {
        self.sync.get().holder
    }

    /// Most recent actor to pick this weapon up, kept after it is dropped
    pub fn last_holder(&self) -> Option<ActorId> {
        self.last_holder
    }

    pub fn pose(&self) -> Pose {
        self.sync.get().pose
    }

    pub fn rack(&self) -> Pose {
        self.rack
    }

    pub fn rounds_left(&self) -> u32 {
        self.rounds_left
    }

    pub fn magazine_size(&self) -> u32 {
        self.config.magazine_size
    }

    pub fn current_bloom(&self) -> f32 {
        self.current_bloom
    }

    pub fn is_dual_wielding(&self) -> bool {
        self.is_dual_wielding
    }

    pub fn is_reloading(&self) -> bool {
        self.reload_timer > 0.0
    }

    pub fn is_resetting(&self) -> bool {
        self.reset.is_running()
    }

    pub fn reload_progress(&self) -> f32 {
        if self.reload_timer <= 0.0 {
            return 1.0;
        }
        (1.0 - self.reload_timer / self.config.reload_time).clamp(0.0, 1.0)
    }

    pub fn fire_state(&self) -> FireState {
        if self.holder().is_none() {
            FireState::Dropped
        } else if self.reload_timer > 0.0 {
            FireState::Reloading
        } else if self.rechamber_timer > 0.0 {
            FireState::Rechambering
        } else if self.is_firing {
            FireState::Firing
        } else {
            FireState::Idle
        }
    }

    pub fn sync_snapshot(&self) -> Versioned<WeaponSync> {
        self.sync.snapshot()
    }

    pub fn set_trigger(&mut self, down: bool) {
        self.trigger_down = down;
    }

    pub fn set_aim(&mut self, origin: Vec3, direction: Vec3) {
        let dir = direction.normalize_or_zero();
        let rotation = if dir == Vec3::ZERO {
            self.muzzle.rotation
        } else {
            Quat::from_rotation_arc(Vec3::Z, dir)
        };
        self.muzzle = Pose::new(origin, rotation);
    }

    pub fn muzzle(&self) -> Pose {
        self.muzzle
    }

    /// Queue a manual reload for the next update
    pub fn request_reload(&mut self) {
        self.manual_reload = true;
    }

    pub fn set_dual_wielding(&mut self, dual: bool) {
        self.is_dual_wielding = dual;
    }

    pub fn can_fire(&self) -> bool {
        self.holder().is_some()
            && self.refire_timer <= 0.0
            && self.rechamber_timer <= 0.0
            && self.rounds_left > 0
            && (!self.is_firing || self.config.is_automatic)
    }

    /// Advance fire control by `dt`. Only the holding peer calls this.
    /// Returns the shot fired this update, if any.
    pub fn update(&mut self, dt: f32) -> (Option<Shot>, ReloadStatus) {
        let status = self.update_reload(dt);
        let mut shot = None;

        if status.is_ready() && self.holder().is_some() {
            if self.refire_timer > 0.0 {
                self.refire_timer -= dt;
            }
            // a chambered round needs a round to chamber
            if self.rechamber_timer > 0.0 && self.rounds_left > 0 {
                self.rechamber_timer -= dt;
            }

            if self.trigger_down {
                shot = self.fire();
            }

            if self.rounds_left == 0 || self.manual_reload {
                self.reload();
            }
        }
        self.manual_reload = false;

        self.is_firing &= self.trigger_down || self.rounds_left == 0;
        self.update_bloom(dt);
        (shot, status)
    }

    /// Fire one round if fire control allows it
    pub fn fire(&mut self) -> Option<Shot> {
        if !self.can_fire() {
            return None;
        }

        self.is_firing = true;
        self.rounds_left -= 1;

        let penalty = if self.is_dual_wielding {
            self.config.dual_wield_bloom_penalty
        } else {
            1.0
        };
        self.current_bloom =
            (self.current_bloom + self.config.bloom_per_shot * penalty).min(self.config.max_bloom);
        self.bloom_delay_timer = self.config.bloom_decay_delay;

        self.refire_timer += self.config.refire_interval();
        self.rechamber_timer = if self.config.rechamber_each_shot {
            self.config.rechamber_time
        } else {
            0.0
        };

        Some(Shot {
            weapon: self.id,
            origin: self.muzzle.position,
            direction: self.muzzle.forward(),
        })
    }

    /// Start a reload. Ignored while one is pending or the magazine is full.
    pub fn reload(&mut self) -> bool {
        if self.reload_timer > 0.0 || self.rounds_left >= self.config.magazine_size {
            return false;
        }

        if self.rounds_left == 0 {
            self.rechamber_timer += self.config.rechamber_time;
        }
        self.reload_timer += self.config.reload_time;
        self.refire_timer = 0.0;
        debug!(weapon = %self.id, rounds_left = self.rounds_left, "Reload started");
        true
    }

    fn update_reload(&mut self, dt: f32) -> ReloadStatus {
        if self.reload_timer <= 0.0 {
            return ReloadStatus::Ready;
        }

        self.reload_timer -= dt;
        if self.reload_timer <= 0.0 {
            self.finish_reload();
            return ReloadStatus::Completed;
        }
        ReloadStatus::Reloading(self.reload_progress())
    }

    fn finish_reload(&mut self) {
        self.reload_timer = 0.0;
        self.rounds_left = self.config.magazine_size;
    }

    fn bloom_floor(&self) -> f32 {
        let floor = if self.is_dual_wielding {
            self.config.min_bloom * self.config.dual_wield_min_bloom_penalty
        } else {
            self.config.min_bloom
        };
        floor.clamp(self.config.min_bloom, self.config.max_bloom)
    }

    fn update_bloom(&mut self, dt: f32) {
        if self.is_firing {
            return;
        }
        if self.bloom_delay_timer > 0.0 {
            self.bloom_delay_timer -= dt;
            return;
        }
        let floor = self.bloom_floor();
        self.current_bloom = (self.current_bloom - self.config.bloom_decay_rate * dt)
            .max(floor)
            .min(self.config.max_bloom);
    }

    /// Direction of one pellet: uniform inside a cone of half-angle
    /// `current_bloom` degrees around `direction`
    pub fn spread<R: Rng + ?Sized>(&self, direction: Vec3, rng: &mut R) -> Vec3 {
        perturb(direction, self.current_bloom.to_radians(), rng)
    }

    /// Owner-side pickup. Ownership must already be with `holder.actor`.
    pub fn pick_up(
        &mut self,
        auth: Authority,
        holder: Holder,
    ) -> Result<Option<Versioned<WeaponSync>>, ReplicationError> {
        let update = self.sync.write(
            auth,
            WeaponSync {
                holder: Some(holder),
                pose: self.pose(),
            },
        )?;
        self.reset.cancel();
        self.last_holder = Some(holder.actor);
        self.trigger_down = false;
        self.is_firing = false;
        Ok(update)
    }

    /// Owner-side drop at `pose`. A pending reload completes immediately and
    /// the reset countdown starts when `reset_time` is not negative.
    pub fn drop_at(
        &mut self,
        auth: Authority,
        pose: Pose,
        reset_time: f32,
    ) -> Result<Option<Versioned<WeaponSync>>, ReplicationError> {
        let update = self.sync.write(auth, WeaponSync { holder: None, pose })?;
        if self.reload_timer > 0.0 {
            self.finish_reload();
        }
        self.trigger_down = false;
        self.is_firing = false;
        self.is_dual_wielding = false;
        if reset_time >= 0.0 {
            self.reset.start(reset_time);
        }
        Ok(update)
    }

    /// Owner-side: advance the reset countdown. Returns the replicated update
    /// when the weapon went back to its rack.
    pub fn tick_reset(
        &mut self,
        auth: Authority,
        dt: f32,
    ) -> Result<Option<Versioned<WeaponSync>>, ReplicationError> {
        if self.holder().is_some() || !self.reset.tick(dt) {
            return Ok(None);
        }
        self.return_to_rack(auth)
    }

    /// Newly owned while lying off its rack: start the reset countdown the
    /// previous owner was running.
    pub fn adopt(&mut self, reset_time: f32) {
        if self.holder().is_none() && self.pose() != self.rack && !self.reset.is_running() && reset_time >= 0.0 {
            self.reset.start(reset_time);
        }
    }

    /// Back on the rack with a full magazine
    pub fn return_to_rack(&mut self, auth: Authority) -> Result<Option<Versioned<WeaponSync>>, ReplicationError> {
        let update = self.sync.write(
            auth,
            WeaponSync {
                holder: None,
                pose: self.rack,
            },
        )?;
        self.reset.cancel();
        self.restore();
        debug!(weapon = %self.id, "Weapon returned to rack");
        Ok(update)
    }

    fn restore(&mut self) {
        self.rounds_left = self.config.magazine_size;
        self.reload_timer = 0.0;
        self.refire_timer = 0.0;
        self.rechamber_timer = 0.0;
        self.bloom_delay_timer = 0.0;
        self.current_bloom = self.config.min_bloom;
        self.is_firing = false;
        self.trigger_down = false;
        self.manual_reload = false;
        self.is_dual_wielding = false;
        self.muzzle = self.rack;
    }

    /// Remote-side apply of the pickup state. Returns true when it changed.
    pub fn observe(&mut self, update: &Versioned<WeaponSync>) -> bool {
        let Some(state) = self.sync.observe(update) else {
            return false;
        };
        if let Some(holder) = state.holder {
            self.last_holder = Some(holder.actor);
        }
        if state.holder.is_none() && state.pose == self.rack {
            self.restore();
        }
        true
    }

    /// Back to the initial state at a match boundary. The replicated version
    /// is kept so later writes still order after earlier ones.
    pub fn reset_for_match(&mut self) {
        self.sync.assign_quiet(WeaponSync {
            holder: None,
            pose: self.rack,
        });
        self.last_holder = None;
        self.reset.cancel();
        self.restore();
        self.hits.clear();
        self.projectiles.recycle_all();
    }
}

/// Rotate `direction` by a random angle of at most `half_angle` radians,
/// uniformly over the cone's cross-section.
pub fn perturb<R: Rng + ?Sized>(direction: Vec3, half_angle: f32, rng: &mut R) -> Vec3 {
    let dir = direction.normalize_or_zero();
    if dir == Vec3::ZERO || half_angle <= 0.0 {
        return dir;
    }

    let theta = half_angle * rng.gen::<f32>().sqrt();
    let phi = rng.gen_range(0.0..std::f32::consts::TAU);
    let axis = Quat::from_axis_angle(dir, phi) * dir.any_orthonormal_vector();
    (Quat::from_axis_angle(axis, theta) * dir).normalize()
}
