//! Write-only HUD and audio sink

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::WeaponId;

/// Most cues kept between two reads
const CUE_BACKLOG: usize = 32;

/// Discrete audio cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    Fire,
    Hit,
    Kill,
}

/// Everything a peer reports to its player's HUD. Never read back by the
/// simulation.
pub trait HudSink: Send + Sync {
    fn health(&self, fraction: f32);
    fn ammo(&self, weapon: WeaponId, rounds_left: u32, magazine: u32);
    fn reload_progress(&self, weapon: WeaponId, fraction: f32);
    fn scores(&self, scores: &[u32]);
    fn countdown(&self, seconds: u32);
    fn message(&self, text: &str);
    fn cue(&self, cue: Cue);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmmoReadout {
    pub weapon: WeaponId,
    /// "rounds / magazine"
    pub text: String,
    pub reload_progress: f32,
}

/// Latest values pushed to a HUD
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HudState {
    pub health: f32,
    pub ammo: Vec<AmmoReadout>,
    pub scores: Vec<u32>,
    pub countdown: u32,
    pub message: Option<String>,
    pub cues: Vec<Cue>,
}

impl HudState {
    fn readout(&mut self, weapon: WeaponId) -> &mut AmmoReadout {
        let index = match self.ammo.iter().position(|a| a.weapon == weapon) {
            Some(index) => index,
            None => {
                self.ammo.push(AmmoReadout {
                    weapon,
                    text: String::new(),
                    reload_progress: 1.0,
                });
                self.ammo.len() - 1
            }
        };
        &mut self.ammo[index]
    }
}

/// HUD state shared between a peer and the connection that displays it
#[derive(Debug, Clone, Default)]
pub struct SharedHud(Arc<Mutex<HudState>>);

impl SharedHud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HudState {
        self.0.lock().clone()
    }

    /// Snapshot, then clear the cue backlog
    pub fn take(&self) -> HudState {
        let mut state = self.0.lock();
        let snapshot = state.clone();
        state.cues.clear();
        snapshot
    }
}

impl HudSink for SharedHud {
    fn health(&self, fraction: f32) {
        self.0.lock().health = fraction;
    }

    fn ammo(&self, weapon: WeaponId, rounds_left: u32, magazine: u32) {
        self.0.lock().readout(weapon).text = format!("{} / {}", rounds_left, magazine);
    }

    fn reload_progress(&self, weapon: WeaponId, fraction: f32) {
        self.0.lock().readout(weapon).reload_progress = fraction;
    }

    fn scores(&self, scores: &[u32]) {
        self.0.lock().scores = scores.to_vec();
    }

    fn countdown(&self, seconds: u32) {
        self.0.lock().countdown = seconds;
    }

    fn message(&self, text: &str) {
        self.0.lock().message = Some(text.to_string());
    }

    fn cue(&self, cue: Cue) {
        let mut state = self.0.lock();
        if state.cues.len() >= CUE_BACKLOG {
            state.cues.remove(0);
        }
        state.cues.push(cue);
    }
}
