//! One peer replica of the arena simulation.
//!
//! Every seated actor drives its own `Peer`. A peer writes only the objects
//! it owns (its actor, the weapons and flags it picked up, the match object
//! when it is the master) and learns everything else from `NetMessage`s.
//! Everything a peer wants others to see is queued in its `Outbox`.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::lobby::{Lobby, Roster};
use crate::net::{
    Authority, Endpoint, NetEvent, NetMessage, NetObject, Outbox, OwnershipTable, ReplicationError, SyncUpdate, Target,
    Versioned,
};

use super::arena::Arena;
use super::flag::{Flag, FlagSync, PickupOutcome};
use super::health::{ActorSync, CombatActor, DamageOutcome};
use super::hit::{resolve_damage, DamageContext, HitRecord, Publication};
use super::hud::{Cue, HudSink};
use super::physics::HitVolume;
use super::projectile::{Contact, Launch};
use super::r#match::{MatchController, MatchPhase, MatchTick};
use super::weapon::{ReloadStatus, Shot, Weapon, WeaponSync};
use super::{ActorId, CommandError, Hand, Holder, Item, PeerCommand, Pose, TeamId, WeaponId};

pub struct Peer {
    local: ActorId,
    arena: Arc<Arena>,
    lobby: Arc<dyn Lobby>,
    hud: Arc<dyn HudSink>,
    roster: Arc<Roster>,
    rng: ChaCha8Rng,
    ownership: OwnershipTable,
    actors: BTreeMap<ActorId, CombatActor>,
    weapons: Vec<Weapon>,
    flags: Vec<Flag>,
    game: MatchController,
    outbox: Outbox,
}

impl Peer {
    pub fn new(local: ActorId, arena: Arc<Arena>, lobby: Arc<dyn Lobby>, hud: Arc<dyn HudSink>, seed: u64) -> Self {
        Self {
            local,
            weapons: arena.weapons.iter().map(Weapon::new).collect(),
            flags: arena.stands.iter().map(Flag::new).collect(),
            game: MatchController::new(&arena.game),
            arena,
            lobby,
            hud,
            roster: Arc::new(Roster::default()),
            rng: ChaCha8Rng::seed_from_u64(seed ^ u64::from(local.0)),
            ownership: OwnershipTable::new(),
            actors: BTreeMap::new(),
            outbox: Outbox::new(local),
        }
    }

    pub fn local(&self) -> ActorId {
        self.local
    }

    pub fn phase(&self) -> MatchPhase {
        self.game.phase()
    }

    pub fn game(&self) -> &MatchController {
        &self.game
    }

    pub fn actor(&self, id: ActorId) -> Option<&CombatActor> {
        self.actors.get(&id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &CombatActor> {
        self.actors.values()
    }

    pub fn weapon(&self, id: WeaponId) -> Option<&Weapon> {
        self.weapons.get(id.index())
    }

    pub fn weapons(&self) -> &[Weapon] {
        &self.weapons
    }

    pub fn flag(&self, team: TeamId) -> Option<&Flag> {
        self.flags.get(team.index())
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn ownership(&self) -> &OwnershipTable {
        &self.ownership
    }

    pub fn drain_outbox(&mut self) -> Vec<NetMessage> {
        self.outbox.drain()
    }

    fn auth(&self, object: NetObject) -> Authority {
        Authority::new(self.local, self.ownership.owner_of(object))
    }

    fn local_team(&self) -> Option<TeamId> {
        self.roster.team_of(self.local)
    }

    fn local_position(&self) -> Vec3 {
        self.actors
            .get(&self.local)
            .map_or(Vec3::ZERO, CombatActor::position)
    }

    /// What `actor` holds in `hand`
    fn held_in(&self, actor: ActorId, hand: Hand) -> Option<Item> {
        let holder = Some(Holder { actor, hand });
        self.weapons
            .iter()
            .find(|w| w.holder() == holder)
            .map(|w| Item::Weapon(w.id()))
            .or_else(|| {
                self.flags
                    .iter()
                    .find(|f| f.holder() == holder)
                    .map(|f| Item::Flag(f.team()))
            })
    }

    fn held_weapon(&self, hand: Hand) -> Result<usize, CommandError> {
        match self.held_in(self.local, hand) {
            Some(Item::Weapon(id)) => Ok(id.index()),
            _ => Err(CommandError::NothingHeld(hand)),
        }
    }

    fn take_ownership(&mut self, object: NetObject) {
        if self.ownership.set_owner(object, self.local) {
            self.outbox.transfer(object, self.local);
        }
    }

    fn sync_weapon(&mut self, weapon: WeaponId, update: Result<Option<Versioned<WeaponSync>>, ReplicationError>) {
        match update {
            Ok(Some(state)) => self.outbox.sync(SyncUpdate::WeaponState { weapon, state }),
            Ok(None) => {}
            Err(e) => warn!(weapon = %weapon, error = %e, "Weapon write rejected"),
        }
    }

    fn sync_flag(&mut self, flag: TeamId, update: Result<Option<Versioned<FlagSync>>, ReplicationError>) {
        match update {
            Ok(Some(state)) => self.outbox.sync(SyncUpdate::FlagState { flag, state }),
            Ok(None) => {}
            Err(e) => warn!(flag = %flag, error = %e, "Flag write rejected"),
        }
    }

    fn sync_actor(&mut self, update: Option<Versioned<ActorSync>>) {
        if let Some(state) = update {
            self.outbox.sync(SyncUpdate::ActorState {
                actor: self.local,
                state,
            });
        }
    }

    /// The master seat owns the match object and every unheld pickup
    fn assign_initial_owners(&mut self) {
        self.ownership.clear();
        let Some(master) = self.roster.master() else {
            return;
        };
        self.ownership.set_owner(NetObject::Match, master);
        for weapon in &self.weapons {
            self.ownership.set_owner(NetObject::Weapon(weapon.id()), master);
        }
        for flag in &self.flags {
            self.ownership.set_owner(NetObject::Flag(flag.team()), master);
        }
    }

    /// Lobby call: a match begins with this seating
    pub fn on_match_start(&mut self, roster: Arc<Roster>) {
        self.roster = roster;
        self.assign_initial_owners();
        self.weapons.iter_mut().for_each(Weapon::reset_for_match);
        self.flags.iter_mut().for_each(Flag::reset_for_match);

        let max_health = self.arena.combat.max_health;
        let mut actors = BTreeMap::new();
        for slot in self.roster.slots() {
            let spawn = self.arena.random_spawn(slot.team, &mut self.rng);
            actors.insert(
                slot.actor,
                CombatActor::new(slot.actor, slot.team, max_health, spawn.position),
            );
        }
        self.actors = actors;

        let auth = self.auth(NetObject::Match);
        if let Some(scores) = self.game.start(auth) {
            self.outbox.sync(SyncUpdate::Scores { scores });
        }
        self.hud.scores(self.game.scores());

        if self.actors.contains_key(&self.local) {
            self.respawn_local();
        }
        info!(actor = %self.local, players = self.roster.len(), "Match started");
    }

    /// Lobby call: the session is over
    pub fn on_match_end(&mut self) {
        self.game.finish();
        self.actors.values_mut().for_each(CombatActor::deactivate);
        self.assign_initial_owners();
        self.weapons.iter_mut().for_each(Weapon::reset_for_match);
        self.flags.iter_mut().for_each(Flag::reset_for_match);
        info!(actor = %self.local, "Match ended");
    }

    /// Apply one input from the local player
    pub fn handle_command(&mut self, command: PeerCommand) -> Result<(), CommandError> {
        match command {
            PeerCommand::Move { position } => self.move_local(position),
            PeerCommand::Aim {
                hand,
                origin,
                direction,
            } => {
                let index = self.held_weapon(hand)?;
                self.weapons[index].set_aim(origin, direction);
                Ok(())
            }
            PeerCommand::Trigger { hand, down } => {
                let index = self.held_weapon(hand)?;
                self.weapons[index].set_trigger(down);
                Ok(())
            }
            PeerCommand::Reload { hand } => {
                let index = self.held_weapon(hand)?;
                self.weapons[index].request_reload();
                Ok(())
            }
            PeerCommand::Pickup { item, hand } => self.pick_up(item, hand),
            PeerCommand::Drop { hand } => {
                if self.drop_hand(hand) {
                    Ok(())
                } else {
                    Err(CommandError::NothingHeld(hand))
                }
            }
        }
    }

    fn move_local(&mut self, position: Vec3) -> Result<(), CommandError> {
        let actor = self
            .actors
            .get_mut(&self.local)
            .ok_or(CommandError::NotRunning)?;
        if !actor.movement_enabled() {
            return Err(CommandError::Immobilized(self.local));
        }
        let update = actor.move_to(position);
        self.sync_actor(update);

        for index in 0..self.flags.len() {
            if self.flags[index].holder().is_some_and(|h| h.actor == self.local) {
                let team = self.flags[index].team();
                let auth = self.auth(NetObject::Flag(team));
                let update = self.flags[index].carry_to(auth, position);
                self.sync_flag(team, update);
            }
        }
        Ok(())
    }

    fn pick_up(&mut self, item: Item, hand: Hand) -> Result<(), CommandError> {
        if !self.game.is_running() {
            return Err(CommandError::NotRunning);
        }
        let actor = self.actors.get(&self.local).ok_or(CommandError::NotRunning)?;
        if !actor.pickups_enabled() {
            return Err(CommandError::PickupsDisabled(self.local));
        }
        let position = actor.position();
        if self.held_in(self.local, hand).is_some() {
            return Err(CommandError::HandOccupied(hand));
        }
        let holder = Holder {
            actor: self.local,
            hand,
        };

        match item {
            Item::Weapon(id) => {
                let index = id.index();
                let weapon = self.weapons.get(index).ok_or(CommandError::UnknownItem(item))?;
                if weapon.holder().is_some() {
                    return Err(CommandError::NotPickupable(item));
                }

                self.take_ownership(NetObject::Weapon(id));
                let auth = self.auth(NetObject::Weapon(id));
                let update = self.weapons[index].pick_up(auth, holder);
                self.sync_weapon(id, update);

                let allows_dual = self.weapons[index].config().allow_dual_wielding;
                self.settle_off_hand(hand, allows_dual, Some(index));

                let weapon = &self.weapons[index];
                self.hud.ammo(id, weapon.rounds_left(), weapon.magazine_size());
                debug!(actor = %self.local, weapon = %id, hand = ?hand, "Weapon picked up");
            }
            Item::Flag(team) => {
                let flag = self.flags.get(team.index()).ok_or(CommandError::UnknownItem(item))?;
                let local_team = self.local_team().ok_or(CommandError::NotRunning)?;
                if !flag.can_pick_up(local_team) {
                    return Err(CommandError::NotPickupable(item));
                }
                let proximity = self.arena.combat.pickup_proximity;
                if !flag.in_reach(position, proximity) {
                    debug!(flag = %team, actor = %self.local, "Flag pickup out of reach");
                    return Err(CommandError::OutOfReach(item));
                }

                self.take_ownership(NetObject::Flag(team));
                let auth = self.auth(NetObject::Flag(team));
                let outcome = self.flags[team.index()].pick_up(auth, holder, local_team, position, proximity);
                match outcome {
                    Ok(PickupOutcome::OutOfReach) => return Err(CommandError::OutOfReach(item)),
                    Ok(PickupOutcome::Returned(update)) => {
                        self.sync_flag(team, Ok(update));
                        self.outbox.broadcast(
                            Target::All,
                            NetEvent::FlagPickupLock {
                                flag: team,
                                locked: true,
                            },
                        );
                    }
                    Ok(PickupOutcome::Taken(update)) => {
                        self.sync_flag(team, Ok(update));
                        self.outbox.broadcast(
                            Target::All,
                            NetEvent::FlagPickupLock {
                                flag: team,
                                locked: true,
                            },
                        );
                        self.settle_off_hand(hand, true, None);
                    }
                    Err(e) => warn!(flag = %team, error = %e, "Flag pickup rejected"),
                }
            }
        }
        Ok(())
    }

    /// The item just placed in `hand` wins: when either side forbids dual
    /// wielding the other hand lets go, otherwise both weapons are dual.
    fn settle_off_hand(&mut self, hand: Hand, new_allows_dual: bool, new_weapon: Option<usize>) {
        let other = self.held_in(self.local, hand.other());
        let other_allows_dual = match other {
            None => {
                if let Some(index) = new_weapon {
                    self.weapons[index].set_dual_wielding(false);
                }
                return;
            }
            Some(Item::Weapon(id)) => self.weapons[id.index()].config().allow_dual_wielding,
            Some(Item::Flag(_)) => true,
        };

        if new_allows_dual && other_allows_dual {
            if let Some(index) = new_weapon {
                self.weapons[index].set_dual_wielding(true);
            }
            if let Some(Item::Weapon(id)) = other {
                self.weapons[id.index()].set_dual_wielding(true);
            }
        } else {
            debug!(actor = %self.local, hand = ?hand.other(), "Off-hand item dropped, dual wielding not allowed");
            self.drop_hand(hand.other());
            if let Some(index) = new_weapon {
                self.weapons[index].set_dual_wielding(false);
            }
        }
    }

    /// Let go of whatever the local actor holds in `hand`
    fn drop_hand(&mut self, hand: Hand) -> bool {
        let Some(item) = self.held_in(self.local, hand) else {
            return false;
        };
        let position = self.local_position();

        match item {
            Item::Weapon(id) => {
                let auth = self.auth(NetObject::Weapon(id));
                let reset_time = self.arena.combat.weapon_reset_time;
                let update = self.weapons[id.index()].drop_at(auth, Pose::at(position), reset_time);
                self.sync_weapon(id, update);
            }
            Item::Flag(team) => {
                let auth = self.auth(NetObject::Flag(team));
                let reset_time = self.arena.game.flag_reset_time;
                let update = self.flags[team.index()].drop_at(auth, position, reset_time);
                self.sync_flag(team, update);
                self.outbox.broadcast(
                    Target::All,
                    NetEvent::FlagPickupLock {
                        flag: team,
                        locked: false,
                    },
                );
            }
        }

        if let Some(Item::Weapon(id)) = self.held_in(self.local, hand.other()) {
            self.weapons[id.index()].set_dual_wielding(false);
        }
        debug!(actor = %self.local, item = ?item, "Item dropped");
        true
    }

    /// One simulation step of this replica
    pub fn tick(&mut self, dt: f32) {
        if self.game.phase() == MatchPhase::Idle {
            return;
        }
        self.update_weapons(dt);
        self.update_projectiles(dt);
        self.publish_hits();
        self.update_local_actor(dt);
        self.update_flags(dt);
        self.update_match(dt);
    }

    fn update_weapons(&mut self, dt: f32) {
        for index in 0..self.weapons.len() {
            let id = self.weapons[index].id();
            let held_locally = self.weapons[index]
                .holder()
                .is_some_and(|h| h.actor == self.local);

            if held_locally {
                let (shot, status) = self.weapons[index].update(dt);
                if let Some(shot) = shot {
                    self.fire(index, shot);
                }
                let weapon = &self.weapons[index];
                self.hud.ammo(id, weapon.rounds_left(), weapon.magazine_size());
                match status {
                    ReloadStatus::Reloading(progress) => self.hud.reload_progress(id, progress),
                    ReloadStatus::Completed => self.hud.reload_progress(id, 1.0),
                    ReloadStatus::Ready => {}
                }
            } else if self.ownership.is_owner(self.local, NetObject::Weapon(id)) {
                let auth = self.auth(NetObject::Weapon(id));
                let update = self.weapons[index].tick_reset(auth, dt);
                self.sync_weapon(id, update);
            }
        }
    }

    fn fire(&mut self, index: usize, shot: Shot) {
        self.outbox.broadcast(
            Target::All,
            NetEvent::SpawnProjectiles {
                weapon: shot.weapon,
                origin: shot.origin,
                direction: shot.direction,
            },
        );
        if self.weapons[index].config().is_hitscan {
            self.trace_hitscan(index, shot);
        }
        debug!(
            actor = %self.local,
            weapon = %shot.weapon,
            rounds_left = self.weapons[index].rounds_left(),
            "Shot fired"
        );
    }

    fn hit_targets(&self) -> Vec<(ActorId, HitVolume, u32)> {
        let combat = &self.arena.combat;
        self.actors
            .values()
            .filter(|a| a.is_alive())
            .filter_map(|a| {
                a.hit_volume(combat.hit_height, combat.hit_radius)
                    .map(|v| (a.id(), v, a.life()))
            })
            .collect()
    }

    /// Hitscan resolves on the shooter's peer within the firing tick
    fn trace_hitscan(&mut self, index: usize, shot: Shot) {
        let targets = self.hit_targets();
        let weapon = &self.weapons[index];
        let range = weapon.config().hitscan_range;
        let mut struck = Vec::new();

        for _ in 0..weapon.config().pellet_count {
            let direction = weapon.spread(shot.direction, &mut self.rng);
            let nearest = targets
                .iter()
                .filter(|(actor, _, _)| *actor != self.local)
                .filter_map(|(actor, volume, life)| {
                    volume
                        .ray_hit(shot.origin, direction, range)
                        .map(|d| (d, *actor, *life))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, target, target_life)) = nearest {
                struck.push(HitRecord {
                    target,
                    source: self.local,
                    target_life,
                });
            }
        }

        for record in struck {
            self.weapons[index].hits.record(record);
            self.hud.cue(Cue::Hit);
        }
    }

    fn update_projectiles(&mut self, dt: f32) {
        let targets = self.hit_targets();
        let volumes: Vec<(ActorId, HitVolume)> = targets.iter().map(|(a, v, _)| (*a, *v)).collect();
        let floor = self.arena.floor_height;

        for index in 0..self.weapons.len() {
            let contacts = self.weapons[index].projectiles.step(dt, floor, &volumes);
            for contact in contacts {
                // only the shooter's replica carries damage
                if let Contact::Actor { actor, damage } = contact {
                    if damage <= 0.0 {
                        continue;
                    }
                    let target_life = targets
                        .iter()
                        .find(|(a, _, _)| *a == actor)
                        .map_or(0, |(_, _, life)| *life);
                    self.weapons[index].hits.record(HitRecord {
                        target: actor,
                        source: self.local,
                        target_life,
                    });
                    self.hud.cue(Cue::Hit);
                }
            }
        }
    }

    fn publish_hits(&mut self) {
        for index in 0..self.weapons.len() {
            if !self.weapons[index].hits.has_candidate() {
                continue;
            }
            let auth = self.auth(NetObject::Weapon(self.weapons[index].id()));
            for publication in self.weapons[index].hits.publish(auth) {
                match publication {
                    Publication::Changed { update, record } => {
                        self.outbox.sync(update);
                        self.resolve_hit(index, &record);
                    }
                    Publication::Rebroadcast { target, event } => self.outbox.broadcast(target, event),
                }
            }
        }
    }

    /// Every peer runs this for every published hit; only the target's own
    /// peer changes anything.
    fn resolve_hit(&mut self, index: usize, record: &HitRecord) {
        let weapon = &self.weapons[index];
        let ctx = DamageContext {
            local: self.local,
            holder: weapon.holder().map(|h| h.actor),
            base_damage: weapon.config().projectile_damage,
            friendly_fire_mult: self.arena.combat.friendly_fire_mult(),
        };
        let roster = &self.roster;
        let Some((damage, shooter)) = resolve_damage(record, &ctx, |actor| roster.team_of(actor)) else {
            return;
        };

        let Some(actor) = self.actors.get_mut(&self.local) else {
            error!(actor = %self.local, "Hit resolved for an actor with no combat state");
            return;
        };
        let outcome = actor.apply_damage(self.local, damage, Some(shooter), Some(record.target_life));
        let fraction = actor.health_fraction();

        match outcome {
            DamageOutcome::Applied { remaining, update } => {
                debug!(actor = %self.local, shooter = %shooter, damage, remaining, "Took damage");
                self.sync_actor(update);
                self.hud.health(fraction);
            }
            DamageOutcome::Lethal { update } => {
                self.sync_actor(update);
                self.hud.health(0.0);
                self.die_local();
            }
            DamageOutcome::Rejected(reason) => {
                debug!(actor = %self.local, shooter = %shooter, reason = ?reason, "Hit ignored");
            }
        }
    }

    fn die_local(&mut self) {
        self.drop_hand(Hand::Left);
        self.drop_hand(Hand::Right);

        let respawn_time = self.arena.combat.respawn_time;
        let Some(actor) = self.actors.get_mut(&self.local) else {
            return;
        };
        if !actor.die(respawn_time) {
            return;
        }
        let killer = actor.last_damaging();
        self.outbox.broadcast(
            Target::All,
            NetEvent::PlayerDied {
                actor: self.local,
                killer,
            },
        );
    }

    fn respawn_local(&mut self) {
        let Some(team) = self.local_team() else {
            return;
        };
        let spawn = self.arena.random_spawn(team, &mut self.rng);
        let Some(actor) = self.actors.get_mut(&self.local) else {
            return;
        };
        let update = actor.respawn(spawn);
        let life = actor.life();
        self.sync_actor(update);
        self.outbox.broadcast(
            Target::Others,
            NetEvent::PlayerRespawned {
                actor: self.local,
                position: spawn.position,
                life,
            },
        );
        self.hud.health(1.0);
    }

    fn update_local_actor(&mut self, dt: f32) {
        let respawn = self
            .actors
            .get_mut(&self.local)
            .is_some_and(|actor| actor.tick_respawn(dt));
        if respawn {
            self.respawn_local();
        }
    }

    fn update_flags(&mut self, dt: f32) {
        let local_team = self.local_team();
        for index in 0..self.flags.len() {
            let team = self.flags[index].team();
            let object = NetObject::Flag(team);
            if !self.ownership.is_owner(self.local, object) {
                continue;
            }
            let auth = self.auth(object);

            let update = self.flags[index].tick_reset(auth, dt);
            if matches!(update, Ok(Some(_))) {
                self.outbox.broadcast(
                    Target::All,
                    NetEvent::FlagPickupLock {
                        flag: team,
                        locked: true,
                    },
                );
            }
            self.sync_flag(team, update);

            let Some(holder) = self.flags[index].holder() else {
                continue;
            };
            if holder.actor != self.local {
                continue;
            }
            let flag = &self.flags[index];
            let stand = self
                .arena
                .stands
                .iter()
                .find(|s| Some(s.team) == local_team && flag.in_capture_volume(s))
                .copied();

            if let Some(stand) = stand {
                let update = self.flags[index].capture(auth, stand.team);
                self.sync_flag(team, update);
                self.outbox
                    .broadcast(Target::All, NetEvent::FlagCaptured { stand: stand.team });
                if let Some(Item::Weapon(id)) = self.held_in(self.local, holder.hand.other()) {
                    self.weapons[id.index()].set_dual_wielding(false);
                }
            }
        }
    }

    fn update_match(&mut self, dt: f32) {
        let auth = self.auth(NetObject::Match);
        match self.game.tick(auth, dt) {
            MatchTick::EndingStarted => self.announce_ending(),
            MatchTick::Finished => {
                info!(actor = %self.local, "End delay over, returning to lobby");
                self.lobby.end_session();
            }
            MatchTick::Nothing => {}
        }
        if self.game.is_running() {
            self.hud.countdown(self.game.countdown_secs());
        }
    }

    fn announce_ending(&mut self) {
        self.outbox.broadcast(
            Target::All,
            NetEvent::MatchEnding {
                scores: self.game.scores().to_vec(),
            },
        );
    }

    fn spawn_volley(&mut self, from: ActorId, weapon: WeaponId, origin: Vec3, direction: Vec3) {
        let index = weapon.index();
        let Some(weapon_ref) = self.weapons.get(index) else {
            warn!(weapon = %weapon, "Spawn for unknown weapon");
            return;
        };
        let config = weapon_ref.config();
        let damage = if config.is_hitscan || from != self.local {
            0.0
        } else {
            config.projectile_damage
        };

        let mut launches = Vec::with_capacity(config.pellet_count as usize);
        for _ in 0..config.pellet_count {
            let pellet = weapon_ref.spread(direction, &mut self.rng);
            launches.push(Launch {
                origin,
                velocity: pellet * config.muzzle_velocity,
                owner: Some(from),
                team: self.roster.team_of(from),
                damage,
                lifetime: config.projectile_lifespan,
                gravity_scale: config.projectile_gravity,
                destroy_on_enter: config.destroy_on_enter,
            });
        }

        let pool = &mut self.weapons[index].projectiles;
        for launch in &launches {
            pool.spawn(launch);
        }
        self.hud.cue(Cue::Fire);
    }

    fn handle_event(&mut self, from: ActorId, event: &NetEvent) {
        match event {
            NetEvent::SpawnProjectiles {
                weapon,
                origin,
                direction,
            } => self.spawn_volley(from, *weapon, *origin, *direction),
            NetEvent::ResolveHit { weapon, record } => {
                let index = weapon.index();
                if index >= self.weapons.len() {
                    return;
                }
                self.weapons[index].hits.observe_rebroadcast(record);
                self.resolve_hit(index, record);
            }
            NetEvent::PlayerDied { actor, killer } => {
                if let Some(dead) = self.actors.get_mut(actor) {
                    dead.observe_death();
                }
                if *killer == Some(self.local) && *actor != self.local {
                    self.hud.cue(Cue::Kill);
                }
            }
            NetEvent::PlayerRespawned { actor, position, life } => {
                if *actor == self.local {
                    return;
                }
                if let Some(respawned) = self.actors.get_mut(actor) {
                    respawned.observe_respawn(*position, *life);
                }
            }
            NetEvent::FlagPickupLock { flag, locked } => {
                if let Some(flag) = self.flags.get_mut(flag.index()) {
                    flag.set_same_team_lock(*locked);
                }
            }
            NetEvent::FlagCaptured { stand } => self.score_capture(*stand),
            NetEvent::MatchEnding { scores } => {
                let result = self.game.on_ending(scores);
                self.drop_carried_flags();
                self.flags.iter_mut().for_each(|f| f.set_enabled(false));
                self.hud.scores(scores);
                self.hud.message(&result.message(self.game.settings()));
            }
        }
    }

    /// Carriers let go of flags once the match is decided
    fn drop_carried_flags(&mut self) {
        let hands: Vec<Hand> = self
            .flags
            .iter()
            .filter_map(Flag::holder)
            .filter(|h| h.actor == self.local)
            .map(|h| h.hand)
            .collect();
        for hand in hands {
            self.drop_hand(hand);
        }
    }

    /// Only the match owner turns a capture into score
    fn score_capture(&mut self, stand: TeamId) {
        let auth = self.auth(NetObject::Match);
        if !auth.is_owner() {
            return;
        }
        match self.game.add_score(auth, stand, self.arena.game.score_per_flag) {
            Ok(change) => {
                if let Some(scores) = change.update {
                    self.outbox.sync(SyncUpdate::Scores { scores });
                }
                self.hud.scores(self.game.scores());
                if change.ending {
                    self.announce_ending();
                }
            }
            Err(e) => warn!(stand = %stand, error = %e, "Capture not scored"),
        }
    }

    fn handle_sync(&mut self, update: &SyncUpdate) {
        match update {
            SyncUpdate::WeaponHit {
                weapon,
                target,
                source,
                target_life,
            } => {
                let index = weapon.index();
                let Some(channel) = self.weapons.get_mut(index).map(|w| &mut w.hits) else {
                    return;
                };
                if let Some(record) = channel.observe(target, *source, *target_life) {
                    self.resolve_hit(index, &record);
                }
            }
            SyncUpdate::WeaponState { weapon, state } => {
                if let Some(weapon) = self.weapons.get_mut(weapon.index()) {
                    weapon.observe(state);
                }
            }
            SyncUpdate::ActorState { actor, state } => {
                if let Some(actor) = self.actors.get_mut(actor) {
                    actor.observe(state);
                }
            }
            SyncUpdate::FlagState { flag, state } => {
                if let Some(flag) = self.flags.get_mut(flag.index()) {
                    flag.observe(state);
                }
            }
            SyncUpdate::Scores { scores } => {
                if self.game.observe_scores(scores) {
                    self.hud.scores(self.game.scores());
                }
            }
        }
    }

    /// Pick up timers a departed owner was running for `object`
    fn adopt(&mut self, object: NetObject) {
        match object {
            NetObject::Weapon(id) => {
                if let Some(weapon) = self.weapons.get_mut(id.index()) {
                    weapon.adopt(self.arena.combat.weapon_reset_time);
                }
            }
            NetObject::Flag(team) => {
                if let Some(flag) = self.flags.get_mut(team.index()) {
                    flag.adopt(self.arena.game.flag_reset_time);
                }
            }
            NetObject::Match => self.game.adopt(),
            NetObject::Actor(_) => {}
        }
    }
}

impl Endpoint for Peer {
    fn endpoint_id(&self) -> ActorId {
        self.local
    }

    fn receive(&mut self, msg: &NetMessage) {
        match msg {
            NetMessage::Event { from, event, .. } => self.handle_event(*from, event),
            NetMessage::Sync { update, .. } => self.handle_sync(update),
            NetMessage::Ownership { object, owner, .. } => {
                if self.ownership.set_owner(*object, *owner) && *owner == self.local {
                    self.adopt(*object);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WeaponConfig};
    use crate::game::flag::FlagState;
    use crate::game::hud::SharedHud;
    use crate::lobby::SlotTable;
    use crate::net::LoopbackNetwork;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DT: f32 = 1.0 / 30.0;

    #[derive(Default)]
    struct EndFlag(AtomicBool);

    impl Lobby for EndFlag {
        fn end_session(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        peers: Vec<Peer>,
        huds: Vec<SharedHud>,
        net: LoopbackNetwork,
        lobby: Arc<EndFlag>,
    }

    impl Harness {
        fn new(config: Config, players: usize) -> Self {
            let arena = Arena::from_config(&config);
            let lobby = Arc::new(EndFlag::default());
            let mut table = SlotTable::new(config.game.max_players, config.game.num_teams);
            let slots: Vec<_> = (0..players)
                .map(|i| table.join(format!("p{i}")).unwrap())
                .collect();
            let roster = Arc::new(table.roster());

            let huds: Vec<SharedHud> = slots.iter().map(|_| SharedHud::new()).collect();
            let mut peers: Vec<Peer> = slots
                .iter()
                .zip(&huds)
                .map(|(slot, hud)| {
                    Peer::new(
                        slot.actor,
                        arena.clone(),
                        lobby.clone(),
                        Arc::new(hud.clone()),
                        7,
                    )
                })
                .collect();
            for peer in &mut peers {
                peer.on_match_start(roster.clone());
            }

            let mut harness = Self {
                peers,
                huds,
                net: LoopbackNetwork::new(),
                lobby,
            };
            harness.settle();
            harness
        }

        fn id(&self, index: usize) -> ActorId {
            self.peers[index].local()
        }

        /// Route outboxes until the network goes quiet
        fn settle(&mut self) {
            for _ in 0..8 {
                for peer in &mut self.peers {
                    let out = peer.drain_outbox();
                    self.net.submit(out);
                }
                if self.net.pending() == 0 {
                    return;
                }
                self.net.deliver(self.peers.iter_mut());
            }
        }

        fn step(&mut self, dt: f32) {
            for peer in &mut self.peers {
                peer.tick(dt);
            }
            self.settle();
        }

        fn command(&mut self, index: usize, command: PeerCommand) -> Result<(), CommandError> {
            let result = self.peers[index].handle_command(command);
            self.settle();
            result
        }

        fn health(&self, observer: usize, actor: usize) -> f32 {
            self.peers[observer].actor(self.id(actor)).unwrap().health()
        }
    }

    fn hitscan_config() -> Config {
        Config {
            weapons: vec![WeaponConfig {
                name: "marker".to_string(),
                copies: 2,
                is_hitscan: true,
                projectile_damage: 40.0,
                magazine_size: 10,
                rounds_per_min: 600,
                min_bloom: 0.0,
                max_bloom: 0.0,
                bloom_per_shot: 0.0,
                ..WeaponConfig::default()
            }
            .sanitized()],
            ..Config::default()
        }
    }

    fn place(h: &mut Harness, index: usize, position: Vec3) {
        h.command(index, PeerCommand::Move { position }).unwrap();
    }

    fn arm(h: &mut Harness, index: usize, weapon: u16) {
        h.command(
            index,
            PeerCommand::Pickup {
                item: Item::Weapon(WeaponId(weapon)),
                hand: Hand::Right,
            },
        )
        .unwrap();
        h.command(
            index,
            PeerCommand::Aim {
                hand: Hand::Right,
                origin: Vec3::new(0.0, 1.0, 0.0),
                direction: Vec3::Z,
            },
        )
        .unwrap();
    }

    fn pull_trigger(h: &mut Harness, index: usize) {
        h.command(
            index,
            PeerCommand::Trigger {
                hand: Hand::Right,
                down: true,
            },
        )
        .unwrap();
        h.step(DT);
        h.command(
            index,
            PeerCommand::Trigger {
                hand: Hand::Right,
                down: false,
            },
        )
        .unwrap();
        // let the refire timer run out
        for _ in 0..4 {
            h.step(DT);
        }
    }

    #[test]
    fn test_repeated_hits_apply_once_each_then_kill() {
        let mut h = Harness::new(hitscan_config(), 2);
        place(&mut h, 0, Vec3::ZERO);
        place(&mut h, 1, Vec3::new(0.0, 0.0, 10.0));
        arm(&mut h, 0, 0);

        pull_trigger(&mut h, 0);
        assert_eq!(h.health(1, 1), 60.0);
        // replicated back to the shooter
        assert_eq!(h.health(0, 1), 60.0);

        // same target again goes through the rebroadcast path
        pull_trigger(&mut h, 0);
        assert_eq!(h.health(1, 1), 20.0);

        pull_trigger(&mut h, 0);
        let victim = h.peers[1].actor(h.id(1)).unwrap();
        assert!(!victim.is_alive());
        assert_eq!(victim.last_damaging(), Some(h.id(0)));
        assert!(h.huds[0].snapshot().cues.contains(&Cue::Kill));
        assert!(h.peers[0].actor(h.id(1)).unwrap().hit_volume(1.7, 0.35).is_none());

        // dead actors take no more hits
        pull_trigger(&mut h, 0);
        assert!(h.health(1, 1) <= 0.0);
    }

    #[test]
    fn test_every_pellet_of_a_volley_deals_damage() {
        let mut config = hitscan_config();
        config.weapons[0].pellet_count = 3;
        config.weapons[0].projectile_damage = 10.0;
        let mut h = Harness::new(config, 2);
        place(&mut h, 0, Vec3::ZERO);
        place(&mut h, 1, Vec3::new(0.0, 0.0, 10.0));
        arm(&mut h, 0, 0);

        pull_trigger(&mut h, 0);
        assert_eq!(h.health(1, 1), 70.0);
        assert_eq!(h.health(0, 1), 70.0);
        assert_eq!(h.peers[0].weapon(WeaponId(0)).unwrap().rounds_left(), 9);
    }

    #[test]
    fn test_victim_respawns_after_timer() {
        let mut h = Harness::new(hitscan_config(), 2);
        place(&mut h, 0, Vec3::ZERO);
        place(&mut h, 1, Vec3::new(0.0, 0.0, 10.0));
        arm(&mut h, 0, 0);
        for _ in 0..3 {
            pull_trigger(&mut h, 0);
        }
        assert!(!h.peers[1].actor(h.id(1)).unwrap().is_alive());

        let respawn_time = Config::default().combat.respawn_time;
        let steps = (respawn_time / DT).ceil() as usize + 2;
        for _ in 0..steps {
            h.step(DT);
        }
        let victim = h.peers[1].actor(h.id(1)).unwrap();
        assert!(victim.is_alive());
        assert_eq!(victim.health(), 100.0);
        assert_eq!(victim.life(), 2);
        // observers see the respawn too
        let replica = h.peers[0].actor(h.id(1)).unwrap();
        assert!(replica.is_alive());
        assert_eq!(replica.life(), 2);
    }

    #[test]
    fn test_friendly_fire_off_leaves_teammate_untouched() {
        let mut h = Harness::new(hitscan_config(), 3);
        // slots 0 and 2 share a team
        place(&mut h, 0, Vec3::ZERO);
        place(&mut h, 1, Vec3::new(5.0, 0.0, 0.0));
        place(&mut h, 2, Vec3::new(0.0, 0.0, 10.0));
        arm(&mut h, 0, 0);

        pull_trigger(&mut h, 0);
        assert_eq!(h.health(2, 2), 100.0);
        assert_eq!(h.peers[0].weapon(WeaponId(0)).unwrap().hits.last_hit_target(), Some(h.id(2)));
    }

    #[test]
    fn test_pickup_transfers_ownership() {
        let mut h = Harness::new(hitscan_config(), 2);
        arm(&mut h, 1, 1);
        let object = NetObject::Weapon(WeaponId(1));
        assert!(h.peers[0].ownership().is_owner(h.id(1), object));
        let holder = h.peers[0].weapon(WeaponId(1)).unwrap().holder().unwrap();
        assert_eq!(holder.actor, h.id(1));

        // the rack copy cannot be taken twice
        let err = h.command(
            0,
            PeerCommand::Pickup {
                item: Item::Weapon(WeaponId(1)),
                hand: Hand::Left,
            },
        );
        assert_eq!(err, Err(CommandError::NotPickupable(Item::Weapon(WeaponId(1)))));
    }

    #[test]
    fn test_capture_scores_and_ends_match() {
        let mut config = hitscan_config();
        config.game.score_to_win = 1;
        let mut h = Harness::new(config, 2);
        let red_home = h.peers[0].flag(TeamId(1)).unwrap().position();
        let blue_home = h.peers[0].flag(TeamId(0)).unwrap().position();

        place(&mut h, 0, red_home - Vec3::Y);
        h.command(
            0,
            PeerCommand::Pickup {
                item: Item::Flag(TeamId(1)),
                hand: Hand::Left,
            },
        )
        .unwrap();
        assert_eq!(
            h.peers[1].flag(TeamId(1)).unwrap().holder().map(|h| h.actor),
            Some(h.id(0))
        );

        place(&mut h, 0, blue_home - Vec3::Y);
        h.step(DT);
        assert_eq!(h.peers[1].flag(TeamId(1)).unwrap().state(), FlagState::Captured);
        h.step(DT);

        for peer in &h.peers {
            assert_eq!(peer.game().scores(), &[1, 0]);
            assert_eq!(peer.phase(), MatchPhase::Ending);
            let flag = peer.flag(TeamId(1)).unwrap();
            assert_eq!(flag.state(), FlagState::AtStand);
            assert_eq!(flag.position(), red_home);
        }
        assert_eq!(h.huds[1].snapshot().message.as_deref(), Some("BLUE TEAM WINS"));

        let delay = Config::default().game.end_game_delay;
        for _ in 0..((delay / DT).ceil() as usize + 2) {
            h.step(DT);
        }
        assert!(h.lobby.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_carried_flag_dropped_when_match_ends() {
        let mut config = hitscan_config();
        config.game.game_length = 0.5;
        let mut h = Harness::new(config, 2);
        let red_home = h.peers[0].flag(TeamId(1)).unwrap().position();
        let carry_spot = red_home - Vec3::Y;

        place(&mut h, 0, carry_spot);
        h.command(
            0,
            PeerCommand::Pickup {
                item: Item::Flag(TeamId(1)),
                hand: Hand::Left,
            },
        )
        .unwrap();

        for _ in 0..20 {
            h.step(DT);
        }
        for peer in &h.peers {
            assert_eq!(peer.phase(), MatchPhase::Ending);
            let flag = peer.flag(TeamId(1)).unwrap();
            assert_eq!(flag.state(), FlagState::Dropped);
            assert_eq!(flag.holder(), None);
            assert!(!flag.is_enabled());
        }

        // the former carrier walks away without it
        place(&mut h, 0, Vec3::ZERO);
        h.step(DT);
        assert_eq!(h.peers[1].flag(TeamId(1)).unwrap().position(), carry_spot);
    }

    #[test]
    fn test_far_flag_pickup_is_rejected() {
        // slot 2 plays blue and is not the master
        let mut h = Harness::new(hitscan_config(), 3);
        place(&mut h, 2, Vec3::ZERO);
        let err = h.command(
            2,
            PeerCommand::Pickup {
                item: Item::Flag(TeamId(1)),
                hand: Hand::Left,
            },
        );
        assert_eq!(err, Err(CommandError::OutOfReach(Item::Flag(TeamId(1)))));

        let object = NetObject::Flag(TeamId(1));
        for peer in &h.peers {
            assert_eq!(peer.flag(TeamId(1)).unwrap().holder(), None);
            assert!(peer.ownership().is_owner(h.id(0), object));
        }
    }

    #[test]
    fn test_own_team_cannot_grab_flag_at_stand() {
        let mut h = Harness::new(hitscan_config(), 2);
        let blue_home = h.peers[0].flag(TeamId(0)).unwrap().position();
        place(&mut h, 0, blue_home - Vec3::Y);
        let err = h.command(
            0,
            PeerCommand::Pickup {
                item: Item::Flag(TeamId(0)),
                hand: Hand::Left,
            },
        );
        assert_eq!(err, Err(CommandError::NotPickupable(Item::Flag(TeamId(0)))));
    }

    #[test]
    fn test_later_hand_wins_when_dual_wield_forbidden() {
        // default catalogue: pistols allow dual wielding, the rifle does not
        let mut h = Harness::new(Config::default(), 2);
        let pistol = h.peers[0]
            .weapons()
            .iter()
            .position(|w| w.config().allow_dual_wielding)
            .unwrap() as u16;
        let second_pistol = pistol + 1;
        let rifle = h.peers[0]
            .weapons()
            .iter()
            .position(|w| w.config().is_automatic)
            .unwrap() as u16;

        let pick = |h: &mut Harness, weapon: u16, hand: Hand| {
            h.command(
                0,
                PeerCommand::Pickup {
                    item: Item::Weapon(WeaponId(weapon)),
                    hand,
                },
            )
            .unwrap();
        };

        pick(&mut h, pistol, Hand::Right);
        pick(&mut h, second_pistol, Hand::Left);
        assert!(h.peers[0].weapon(WeaponId(pistol)).unwrap().is_dual_wielding());
        assert!(h.peers[0].weapon(WeaponId(second_pistol)).unwrap().is_dual_wielding());

        h.command(0, PeerCommand::Drop { hand: Hand::Left }).unwrap();
        assert!(!h.peers[0].weapon(WeaponId(pistol)).unwrap().is_dual_wielding());

        pick(&mut h, rifle, Hand::Left);
        let peer = &h.peers[0];
        assert_eq!(peer.weapon(WeaponId(pistol)).unwrap().holder(), None);
        assert!(!peer.weapon(WeaponId(rifle)).unwrap().is_dual_wielding());
        assert_eq!(
            h.peers[1].weapon(WeaponId(pistol)).unwrap().holder(),
            None
        );
    }

    #[test]
    fn test_dead_actor_cannot_move_or_pick_up() {
        let mut h = Harness::new(hitscan_config(), 2);
        place(&mut h, 0, Vec3::ZERO);
        place(&mut h, 1, Vec3::new(0.0, 0.0, 10.0));
        arm(&mut h, 0, 0);
        for _ in 0..3 {
            pull_trigger(&mut h, 0);
        }
        let err = h.command(1, PeerCommand::Move { position: Vec3::ONE });
        assert_eq!(err, Err(CommandError::Immobilized(h.id(1))));
        let err = h.command(
            1,
            PeerCommand::Pickup {
                item: Item::Weapon(WeaponId(1)),
                hand: Hand::Left,
            },
        );
        assert_eq!(err, Err(CommandError::PickupsDisabled(h.id(1))));
    }
}
