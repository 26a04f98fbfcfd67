//! Hit publication and damage resolution.
//!
//! A shooter's peer records a candidate hit locally. Only the owner of the
//! weapon publishes it: a new target goes out as a replicated field change,
//! a repeat of the last published target goes out as a `ResolveHit` event
//! because an unchanged field would never notify. Every peer hands the
//! resulting record to `resolve_damage`; only the target's own peer acts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::net::{Authority, NetEvent, Replicated, SyncUpdate, Target, Versioned};

use super::{ActorId, TeamId, WeaponId};

/// One confirmed hit as seen by the shooter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    pub target: ActorId,
    pub source: ActorId,
    /// Respawn counter of the target when the shot landed
    pub target_life: u32,
}

/// How the owner should send a published hit
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// New target: replicate the field, resolve locally now
    Changed { update: SyncUpdate, record: HitRecord },
    /// Same target as last time: broadcast to every peer, including self
    Rebroadcast { target: Target, event: NetEvent },
}

/// Per-weapon hit channel with the replicated last-hit fields
#[derive(Debug, Clone)]
pub struct HitChannel {
    weapon: WeaponId,
    /// Hits detected this tick, in the order they landed
    candidates: VecDeque<HitRecord>,
    last_hit_target: Replicated<Option<ActorId>>,
    last_hit_source: Option<ActorId>,
    last_hit_life: u32,
}

impl HitChannel {
    pub fn new(weapon: WeaponId) -> Self {
        Self {
            weapon,
            candidates: VecDeque::new(),
            last_hit_target: Replicated::new(None),
            last_hit_source: None,
            last_hit_life: 0,
        }
    }

    pub fn last_hit_target(&self) -> Option<ActorId> {
        *self.last_hit_target.get()
    }

    pub fn last_hit_source(&self) -> Option<ActorId> {
        self.last_hit_source
    }

    /// Queue a locally detected hit. Never trusted by other peers.
    pub fn record(&mut self, record: HitRecord) {
        self.candidates.push_back(record);
    }

    pub fn has_candidate(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Publish every queued candidate in order. Non-owners drop them with a
    /// trace.
    pub fn publish(&mut self, auth: Authority) -> Vec<Publication> {
        if self.candidates.is_empty() {
            return Vec::new();
        }
        if !auth.is_owner() {
            debug!(
                weapon = %self.weapon,
                writer = %auth.writer,
                dropped = self.candidates.len(),
                "Hit candidates dropped, not the weapon owner"
            );
            self.candidates.clear();
            return Vec::new();
        }

        let mut published = Vec::with_capacity(self.candidates.len());
        while let Some(record) = self.candidates.pop_front() {
            if let Some(publication) = self.publish_one(auth, record) {
                published.push(publication);
            }
        }
        published
    }

    fn publish_one(&mut self, auth: Authority, record: HitRecord) -> Option<Publication> {
        self.last_hit_source = Some(record.source);
        self.last_hit_life = record.target_life;

        match self.last_hit_target.write(auth, Some(record.target)) {
            Ok(Some(target)) => {
                debug!(weapon = %self.weapon, target = %record.target, "Publishing new hit target");
                Some(Publication::Changed {
                    update: SyncUpdate::WeaponHit {
                        weapon: self.weapon,
                        target,
                        source: Some(record.source),
                        target_life: record.target_life,
                    },
                    record,
                })
            }
            Ok(None) => {
                debug!(weapon = %self.weapon, target = %record.target, "Re-broadcasting repeat hit");
                Some(Publication::Rebroadcast {
                    target: Target::All,
                    event: NetEvent::ResolveHit {
                        weapon: self.weapon,
                        record,
                    },
                })
            }
            Err(_) => None,
        }
    }

    /// Remote side of the replicated fields. Returns the record to resolve
    /// only when the target actually changed.
    pub fn observe(
        &mut self,
        target: &Versioned<Option<ActorId>>,
        source: Option<ActorId>,
        target_life: u32,
    ) -> Option<HitRecord> {
        let hit = *self.last_hit_target.observe(target)?;
        self.last_hit_source = source;
        self.last_hit_life = target_life;
        Some(HitRecord {
            target: hit?,
            source: source?,
            target_life,
        })
    }

    /// A rebroadcast carries the same values the owner already holds
    pub fn observe_rebroadcast(&mut self, record: &HitRecord) {
        self.last_hit_target.assign_quiet(Some(record.target));
        self.last_hit_source = Some(record.source);
        self.last_hit_life = record.target_life;
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.last_hit_source = None;
        self.last_hit_life = 0;
        self.last_hit_target.assign_quiet(None);
    }
}

/// Inputs the target's peer needs to turn a record into damage
#[derive(Debug, Clone, Copy)]
pub struct DamageContext {
    /// The peer evaluating the record
    pub local: ActorId,
    /// Current holder of the weapon, if any
    pub holder: Option<ActorId>,
    pub base_damage: f32,
    /// 0 when friendly fire is off
    pub friendly_fire_mult: f32,
}

/// Damage to apply to the local actor, or `None` when this peer is not the
/// target. The shooter is the weapon's holder, falling back to the recorded
/// source once the weapon has been dropped.
pub fn resolve_damage(
    record: &HitRecord,
    ctx: &DamageContext,
    team_of: impl Fn(ActorId) -> Option<TeamId>,
) -> Option<(f32, ActorId)> {
    if record.target != ctx.local {
        return None;
    }

    let shooter = ctx.holder.unwrap_or(record.source);
    let same_team = match (team_of(shooter), team_of(record.target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };

    let damage = if same_team {
        ctx.base_damage * ctx.friendly_fire_mult
    } else {
        ctx.base_damage
    };
    Some((damage, shooter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOOTER: ActorId = ActorId(1);
    const VICTIM: ActorId = ActorId(2);
    const TEAMMATE: ActorId = ActorId(3);

    fn team_of(actor: ActorId) -> Option<TeamId> {
        match actor {
            SHOOTER | TEAMMATE => Some(TeamId(0)),
            VICTIM => Some(TeamId(1)),
            _ => None,
        }
    }

    fn hit_on(target: ActorId) -> HitRecord {
        HitRecord {
            target,
            source: SHOOTER,
            target_life: 1,
        }
    }

    #[test]
    fn test_non_owner_never_publishes() {
        let mut channel = HitChannel::new(WeaponId(0));
        channel.record(hit_on(VICTIM));
        assert!(channel.publish(Authority::new(SHOOTER, Some(VICTIM))).is_empty());
        assert!(!channel.has_candidate());
        assert_eq!(channel.last_hit_target(), None);
    }

    #[test]
    fn test_repeat_target_goes_through_rebroadcast() {
        let mut channel = HitChannel::new(WeaponId(0));
        let auth = Authority::own(SHOOTER);

        channel.record(hit_on(VICTIM));
        assert!(matches!(channel.publish(auth).as_slice(), [Publication::Changed { .. }]));

        channel.record(hit_on(VICTIM));
        match channel.publish(auth).pop() {
            Some(Publication::Rebroadcast { target, event }) => {
                assert_eq!(target, Target::All);
                assert_eq!(
                    event,
                    NetEvent::ResolveHit {
                        weapon: WeaponId(0),
                        record: hit_on(VICTIM)
                    }
                );
            }
            other => panic!("expected rebroadcast, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_field_delivery_resolves_once() {
        let mut owner = HitChannel::new(WeaponId(0));
        let mut remote = HitChannel::new(WeaponId(0));
        owner.record(hit_on(VICTIM));
        let Some(Publication::Changed {
            update: SyncUpdate::WeaponHit { target, source, target_life, .. },
            ..
        }) = owner.publish(Authority::own(SHOOTER)).pop()
        else {
            panic!("expected a field change");
        };

        assert_eq!(remote.observe(&target, source, target_life), Some(hit_on(VICTIM)));
        assert_eq!(remote.observe(&target, source, target_life), None);
    }

    #[test]
    fn test_every_hit_of_a_volley_is_published() {
        let mut channel = HitChannel::new(WeaponId(0));
        for target in [VICTIM, VICTIM, TEAMMATE, VICTIM] {
            channel.record(hit_on(target));
        }

        let published = channel.publish(Authority::own(SHOOTER));
        assert_eq!(published.len(), 4);
        assert!(matches!(published[0], Publication::Changed { record, .. } if record.target == VICTIM));
        assert!(matches!(published[1], Publication::Rebroadcast { .. }));
        assert!(matches!(published[2], Publication::Changed { record, .. } if record.target == TEAMMATE));
        assert!(matches!(published[3], Publication::Changed { record, .. } if record.target == VICTIM));
        assert!(!channel.has_candidate());
        assert_eq!(channel.last_hit_target(), Some(VICTIM));
    }

    #[test]
    fn test_stale_update_keeps_newer_source() {
        let mut owner = HitChannel::new(WeaponId(0));
        let mut remote = HitChannel::new(WeaponId(0));
        owner.record(hit_on(VICTIM));
        owner.record(HitRecord {
            target: TEAMMATE,
            source: SHOOTER,
            target_life: 3,
        });
        let updates: Vec<_> = owner
            .publish(Authority::own(SHOOTER))
            .into_iter()
            .filter_map(|p| match p {
                Publication::Changed {
                    update: SyncUpdate::WeaponHit { target, source, target_life, .. },
                    ..
                } => Some((target, source, target_life)),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 2);

        let (newer, newer_source, newer_life) = &updates[1];
        assert!(remote.observe(newer, *newer_source, *newer_life).is_some());

        let (older, _, older_life) = &updates[0];
        assert_eq!(remote.observe(older, Some(VICTIM), *older_life), None);
        assert_eq!(remote.last_hit_target(), Some(TEAMMATE));
        assert_eq!(remote.last_hit_source(), Some(SHOOTER));
        assert_eq!(remote.last_hit_life, 3);
    }

    #[test]
    fn test_only_target_peer_resolves() {
        let ctx = DamageContext {
            local: TEAMMATE,
            holder: Some(SHOOTER),
            base_damage: 25.0,
            friendly_fire_mult: 0.0,
        };
        assert!(resolve_damage(&hit_on(VICTIM), &ctx, team_of).is_none());
    }

    #[test]
    fn test_friendly_fire_disabled_deals_nothing() {
        let ctx = DamageContext {
            local: TEAMMATE,
            holder: Some(SHOOTER),
            base_damage: 25.0,
            friendly_fire_mult: 0.0,
        };
        let (damage, shooter) = resolve_damage(&hit_on(TEAMMATE), &ctx, team_of).unwrap();
        assert_eq!(damage, 0.0);
        assert_eq!(shooter, SHOOTER);
    }

    #[test]
    fn test_dropped_weapon_falls_back_to_source() {
        let ctx = DamageContext {
            local: VICTIM,
            holder: None,
            base_damage: 25.0,
            friendly_fire_mult: 0.5,
        };
        assert_eq!(resolve_damage(&hit_on(VICTIM), &ctx, team_of), Some((25.0, SHOOTER)));
    }
}
