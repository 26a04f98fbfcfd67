//! Time utilities for the peer simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const STATUS_TPS: u32 = 10; // 10 status publications per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Calculate delta time for one simulation tick (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// A one-shot countdown evaluated once per tick.
///
/// `tick` reports expiry exactly once, no matter how large the step is, so a
/// state transition hung off it can never resolve twice.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Countdown {
    remaining: f32,
    armed: bool,
}

impl Countdown {
    /// A countdown that is not running
    pub fn idle() -> Self {
        Self::default()
    }

    /// Arm the countdown. A non-positive duration expires on the next tick.
    pub fn start(&mut self, secs: f32) {
        self.remaining = secs.max(0.0);
        self.armed = true;
    }

    pub fn cancel(&mut self) {
        self.remaining = 0.0;
        self.armed = false;
    }

    pub fn is_running(&self) -> bool {
        self.armed
    }

    pub fn remaining(&self) -> f32 {
        self.remaining
    }

    /// Advance by `dt` seconds. Returns true on the tick the countdown expires.
    pub fn tick(&mut self, dt: f32) -> bool {
        if !self.armed {
            return false;
        }

        self.remaining -= dt;
        if self.remaining <= 0.0 {
            self.remaining = 0.0;
            self.armed = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_expires_once() {
        let mut timer = Countdown::idle();
        timer.start(0.5);
        assert!(!timer.tick(0.25));
        assert!(timer.tick(10.0));
        assert!(!timer.tick(10.0));
        assert!(!timer.is_running());
        assert_eq!(timer.remaining(), 0.0);
    }

    #[test]
    fn test_countdown_zero_duration_expires_next_tick() {
        let mut timer = Countdown::idle();
        timer.start(0.0);
        assert!(timer.is_running());
        assert!(timer.tick(tick_delta()));
    }

    #[test]
    fn test_cancelled_countdown_never_fires() {
        let mut timer = Countdown::idle();
        timer.start(1.0);
        timer.cancel();
        assert!(!timer.tick(5.0));
    }
}
