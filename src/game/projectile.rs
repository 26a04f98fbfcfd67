//! Pooled projectiles - kinematics, expiry and contact

use glam::Vec3;

use super::physics::{integrate, HitVolume};
use super::{ActorId, TeamId, WeaponId};

/// Launch parameters for one pellet
#[derive(Debug, Clone, Copy)]
pub struct Launch {
    pub origin: Vec3,
    pub velocity: Vec3,
    pub owner: Option<ActorId>,
    pub team: Option<TeamId>,
    /// Zero for hitscan traces and for replicas not owned by the local actor
    pub damage: f32,
    pub lifetime: f32,
    pub gravity_scale: f32,
    pub destroy_on_enter: bool,
}

/// Active projectile in the game
#[derive(Debug, Clone)]
pub struct Projectile {
    pub active: bool,
    pub origin_weapon: WeaponId,
    pub owner: Option<ActorId>,
    pub team: Option<TeamId>,
    pub damage: f32,
    pub lifetime_remaining: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub gravity_scale: f32,
    pub destroy_on_enter: bool,
}

/// What a projectile touched during a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contact {
    Actor { actor: ActorId, damage: f32 },
    Floor,
}

impl Projectile {
    fn idle(weapon: WeaponId) -> Self {
        Self {
            active: false,
            origin_weapon: weapon,
            owner: None,
            team: None,
            damage: 0.0,
            lifetime_remaining: 0.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            gravity_scale: 0.0,
            destroy_on_enter: false,
        }
    }

    fn launch(&mut self, launch: &Launch) {
        self.active = true;
        self.owner = launch.owner;
        self.team = launch.team;
        self.damage = launch.damage;
        self.lifetime_remaining = launch.lifetime;
        self.position = launch.origin;
        self.velocity = launch.velocity;
        self.gravity_scale = launch.gravity_scale;
        self.destroy_on_enter = launch.destroy_on_enter;
    }

    pub fn recycle(&mut self) {
        self.active = false;
        self.velocity = Vec3::ZERO;
    }

    /// Advance one step and test the swept segment against `targets`.
    /// The projectile never touches its own owner.
    pub fn step(&mut self, dt: f32, floor_height: f32, targets: &[(ActorId, HitVolume)]) -> Option<Contact> {
        if !self.active {
            return None;
        }

        self.lifetime_remaining -= dt;
        if self.lifetime_remaining <= 0.0 {
            self.recycle();
            return None;
        }

        let from = self.position;
        let (to, velocity) = integrate(self.position, self.velocity, self.gravity_scale, dt);
        self.position = to;
        self.velocity = velocity;

        let struck = targets
            .iter()
            .filter(|(actor, _)| Some(*actor) != self.owner)
            .filter_map(|(actor, volume)| volume.segment_hit(from, to).map(|t| (t, *actor)))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((t, actor)) = struck {
            self.position = from.lerp(to, t);
            let damage = self.damage;
            self.recycle();
            return Some(Contact::Actor { actor, damage });
        }

        if self.destroy_on_enter && to.y < floor_height {
            self.recycle();
            return Some(Contact::Floor);
        }
        None
    }
}

/// Fixed pool of projectiles per weapon, reused round-robin. When every
/// slot is busy the oldest projectile is overwritten.
#[derive(Debug, Clone)]
pub struct ProjectilePool {
    projectiles: Vec<Projectile>,
    next: usize,
}

impl ProjectilePool {
    pub fn new(weapon: WeaponId, size: usize) -> Self {
        Self {
            projectiles: (0..size.max(1)).map(|_| Projectile::idle(weapon)).collect(),
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.projectiles.len()
    }

    pub fn spawn(&mut self, launch: &Launch) -> &Projectile {
        let slot = self.next;
        self.next = (self.next + 1) % self.projectiles.len();
        let projectile = &mut self.projectiles[slot];
        projectile.launch(launch);
        projectile
    }

    pub fn active(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.iter().filter(|p| p.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Step every active projectile. Returns the contacts made this step.
    pub fn step(&mut self, dt: f32, floor_height: f32, targets: &[(ActorId, HitVolume)]) -> Vec<Contact> {
        self.projectiles
            .iter_mut()
            .filter_map(|p| p.step(dt, floor_height, targets))
            .collect()
    }

    pub fn recycle_all(&mut self) {
        self.projectiles.iter_mut().for_each(Projectile::recycle);
        self.next = 0;
    }
}
