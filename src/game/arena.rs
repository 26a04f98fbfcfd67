//! Static arena wiring: settings, weapon racks, spawn pools and flag stands.
//!
//! Built once from `Config` and shared by every peer as an `Arc<Arena>`;
//! nothing in here changes while a session runs.

use std::sync::Arc;

use glam::{Quat, Vec3};
use rand::Rng;

use crate::config::{CombatSettings, Config, MatchSettings, WeaponConfig};

use super::{Pose, TeamId, WeaponId};

/// Distance of each team base from the arena centre along Z
const BASE_DISTANCE: f32 = 40.0;
const SPAWNS_PER_TEAM: usize = 4;
const SPAWN_SPACING: f32 = 3.0;
const RACK_SPACING: f32 = 1.5;
const CAPTURE_RADIUS: f32 = 2.0;

/// A weapon instance placed on a rack
#[derive(Debug, Clone)]
pub struct WeaponSlot {
    pub id: WeaponId,
    pub config: Arc<WeaponConfig>,
    /// Where the weapon returns to when reset
    pub rack: Pose,
}

/// A team's flag stand and its capture volume
#[derive(Debug, Clone, Copy)]
pub struct StandSpec {
    pub team: TeamId,
    /// Where the team's flag rests
    pub home: Pose,
    pub capture_radius: f32,
}

#[derive(Debug, Clone)]
pub struct Arena {
    pub combat: CombatSettings,
    pub game: MatchSettings,
    pub weapons: Vec<WeaponSlot>,
    pub team_spawns: Vec<Vec<Pose>>,
    pub stands: Vec<StandSpec>,
    /// Level geometry below this height recycles `destroy_on_enter` projectiles
    pub floor_height: f32,
}

impl Arena {
    pub fn from_config(config: &Config) -> Arc<Self> {
        let num_teams = config.game.num_teams;

        let mut weapons = Vec::new();
        for weapon in &config.weapons {
            let shared = Arc::new(weapon.clone());
            for _ in 0..weapon.copies.max(1) {
                let index = weapons.len();
                let x = (index as f32 - 4.0) * RACK_SPACING;
                weapons.push(WeaponSlot {
                    id: WeaponId(index as u16),
                    config: shared.clone(),
                    rack: Pose::new(Vec3::new(x, 1.0, 0.0), Quat::IDENTITY),
                });
            }
        }

        let team_spawns = (0..num_teams).map(team_spawn_pool).collect();
        let stands = (0..num_teams)
            .map(|team| StandSpec {
                team: TeamId(team as u8),
                home: Pose::at(base_position(team) + Vec3::new(0.0, 1.0, 0.0)),
                capture_radius: CAPTURE_RADIUS,
            })
            .collect();

        Arc::new(Self {
            combat: config.combat.clone(),
            game: config.game.clone(),
            weapons,
            team_spawns,
            stands,
            floor_height: 0.0,
        })
    }

    pub fn num_teams(&self) -> usize {
        self.game.num_teams
    }

    pub fn weapon(&self, id: WeaponId) -> Option<&WeaponSlot> {
        self.weapons.get(id.index())
    }

    pub fn stand(&self, team: TeamId) -> Option<&StandSpec> {
        self.stands.get(team.index())
    }

    /// Uniformly random spawn point from the team's pool
    pub fn random_spawn<R: Rng + ?Sized>(&self, team: TeamId, rng: &mut R) -> Pose {
        match self.team_spawns.get(team.index()) {
            Some(pool) if !pool.is_empty() => pool[rng.gen_range(0..pool.len())],
            _ => Pose::at(base_position(team.index())),
        }
    }
}

/// Team bases alternate either side of the centre line
fn base_position(team: usize) -> Vec3 {
    let side = if team % 2 == 0 { -1.0 } else { 1.0 };
    let lane = (team / 2) as f32 * 20.0;
    Vec3::new(lane, 0.0, side * BASE_DISTANCE)
}

fn team_spawn_pool(team: usize) -> Vec<Pose> {
    let base = base_position(team);
    // face the centre of the arena
    let facing = if base.z < 0.0 {
        Quat::IDENTITY
    } else {
        Quat::from_rotation_y(std::f32::consts::PI)
    };

    (0..SPAWNS_PER_TEAM)
        .map(|i| {
            let offset = (i as f32 - (SPAWNS_PER_TEAM as f32 - 1.0) / 2.0) * SPAWN_SPACING;
            Pose::new(base + Vec3::new(offset, 0.0, 0.0), facing)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_racks_hold_every_copy() {
        let config = Config::default();
        let arena = Arena::from_config(&config);
        let expected: u32 = config.weapons.iter().map(|w| w.copies.max(1)).sum();
        assert_eq!(arena.weapons.len(), expected as usize);
        for (i, slot) in arena.weapons.iter().enumerate() {
            assert_eq!(slot.id, WeaponId(i as u16));
        }
    }

    #[test]
    fn test_random_spawn_comes_from_team_pool() {
        let arena = Arena::from_config(&Config::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..32 {
            let spawn = arena.random_spawn(TeamId(1), &mut rng);
            assert!(arena.team_spawns[1].contains(&spawn));
        }
    }

    #[test]
    fn test_stands_sit_at_opposite_bases() {
        let arena = Arena::from_config(&Config::default());
        let blue = arena.stand(TeamId(0)).unwrap();
        let red = arena.stand(TeamId(1)).unwrap();
        assert!(blue.home.position.z < 0.0);
        assert!(red.home.position.z > 0.0);
    }
}
