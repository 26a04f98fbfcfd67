//! Match phase, team scores and the end-of-match sequence

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MatchSettings;
use crate::net::{Authority, Replicated, ReplicationError, Versioned};
use crate::util::time::Countdown;

use super::TeamId;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// No match running
    Idle,
    /// Match in progress
    Running,
    /// Result shown, waiting for the end delay
    Ending,
    /// Match ended
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Draw,
    Winner(TeamId),
}

impl MatchResult {
    /// Highest score wins; a shared top score is a draw
    pub fn from_scores(scores: &[u32]) -> Self {
        let Some(&best) = scores.iter().max() else {
            return MatchResult::Draw;
        };
        let mut leaders = scores.iter().enumerate().filter(|(_, s)| **s == best);
        match (leaders.next(), leaders.next()) {
            (Some((team, _)), None) => MatchResult::Winner(TeamId(team as u8)),
            _ => MatchResult::Draw,
        }
    }

    pub fn message(&self, settings: &MatchSettings) -> String {
        match self {
            MatchResult::Draw => "DRAW".to_string(),
            MatchResult::Winner(team) => format!("{} TEAM WINS", settings.team_name(team.index())),
        }
    }
}

/// What a controller tick asks the owning peer to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTick {
    Nothing,
    /// The owner moved the match to `Ending`; broadcast the final scores
    EndingStarted,
    /// The end delay expired on the owner; hand control back to the lobby
    Finished,
}

/// Result of an `add_score` call on the owner
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreChange {
    pub update: Option<Versioned<Vec<u32>>>,
    /// This score reached `score_to_win`
    pub ending: bool,
}

#[derive(Debug, Clone)]
pub struct MatchController {
    settings: MatchSettings,
    phase: MatchPhase,
    scores: Replicated<Vec<u32>>,
    length: Countdown,
    end_delay: Countdown,
    result: Option<MatchResult>,
}

impl MatchController {
    pub fn new(settings: &MatchSettings) -> Self {
        Self {
            scores: Replicated::new(vec![0; settings.num_teams]),
            settings: settings.clone(),
            phase: MatchPhase::Idle,
            length: Countdown::idle(),
            end_delay: Countdown::idle(),
            result: None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn scores(&self) -> &[u32] {
        self.scores.get()
    }

    pub fn result(&self) -> Option<MatchResult> {
        self.result
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Whole seconds left on the match clock
    pub fn countdown_secs(&self) -> u32 {
        self.length.remaining().floor() as u32
    }

    pub fn scores_snapshot(&self) -> Versioned<Vec<u32>> {
        self.scores.snapshot()
    }

    /// Every peer runs this at match start. Only the owner replicates the
    /// zeroed scores; the rest reset locally.
    pub fn start(&mut self, auth: Authority) -> Option<Versioned<Vec<u32>>> {
        let zeroed = vec![0; self.settings.num_teams];
        let update = if auth.is_owner() {
            self.scores.write(auth, zeroed).ok().flatten()
        } else {
            self.scores.assign_quiet(zeroed);
            None
        };

        self.phase = MatchPhase::Running;
        self.result = None;
        self.length.start(self.settings.game_length);
        self.end_delay.cancel();
        info!(game_length = self.settings.game_length, "Match running");
        update
    }

    /// Owner-only score increment. Reaching `score_to_win` starts the end of
    /// the match.
    pub fn add_score(&mut self, auth: Authority, team: TeamId, amount: u32) -> Result<ScoreChange, ReplicationError> {
        if !auth.is_owner() {
            return Err(ReplicationError::NotOwner {
                writer: auth.writer,
                owner: auth.owner,
            });
        }
        if self.phase != MatchPhase::Running {
            warn!(team = %team, phase = ?self.phase, "Score ignored outside a running match");
            return Ok(ScoreChange {
                update: None,
                ending: false,
            });
        }

        let mut scores = self.scores.get().clone();
        let Some(score) = scores.get_mut(team.index()) else {
            warn!(team = %team, "Score for unknown team");
            return Ok(ScoreChange {
                update: None,
                ending: false,
            });
        };
        *score += amount;
        let reached = *score >= self.settings.score_to_win;
        info!(team = %team, score = *score, "Team scored");

        let update = self.scores.write(auth, scores)?;
        if reached {
            self.begin_ending();
        }
        Ok(ScoreChange {
            update,
            ending: reached,
        })
    }

    fn begin_ending(&mut self) {
        self.phase = MatchPhase::Ending;
        self.length.cancel();
        self.end_delay.start(self.settings.end_game_delay);
        self.result = Some(MatchResult::from_scores(self.scores.get()));
        info!(result = ?self.result, "Match ending");
    }

    /// Advance the clocks. Both timers run on every replica so a new owner
    /// can take over mid-countdown, but only the owner acts on expiry.
    pub fn tick(&mut self, auth: Authority, dt: f32) -> MatchTick {
        match self.phase {
            MatchPhase::Running => {
                if self.length.tick(dt) && auth.is_owner() {
                    info!("Match time expired");
                    self.begin_ending();
                    return MatchTick::EndingStarted;
                }
                MatchTick::Nothing
            }
            MatchPhase::Ending => {
                if self.end_delay.tick(dt) && auth.is_owner() {
                    self.phase = MatchPhase::Ended;
                    return MatchTick::Finished;
                }
                MatchTick::Nothing
            }
            _ => MatchTick::Nothing,
        }
    }

    /// Ending broadcast from the owner, carrying the final scores
    pub fn on_ending(&mut self, scores: &[u32]) -> MatchResult {
        if self.phase == MatchPhase::Running {
            self.phase = MatchPhase::Ending;
            self.length.cancel();
            self.end_delay.start(self.settings.end_game_delay);
        }
        let result = MatchResult::from_scores(scores);
        self.result = Some(result);
        result
    }

    /// This replica just became the match owner. A clock that already ran
    /// out under the previous owner expires again on the next tick.
    pub fn adopt(&mut self) {
        match self.phase {
            MatchPhase::Running if !self.length.is_running() => self.length.start(0.0),
            MatchPhase::Ending if !self.end_delay.is_running() => self.end_delay.start(0.0),
            _ => {}
        }
    }

    /// Session over; back to idle for the next match
    pub fn finish(&mut self) {
        self.phase = MatchPhase::Idle;
        self.length.cancel();
        self.end_delay.cancel();
    }

    pub fn observe_scores(&mut self, update: &Versioned<Vec<u32>>) -> bool {
        self.scores.observe(update).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ActorId;

    const MASTER: ActorId = ActorId(1);

    fn settings() -> MatchSettings {
        MatchSettings {
            score_to_win: 3,
            game_length: 300.0,
            end_game_delay: 5.0,
            ..MatchSettings::default()
        }
    }

    #[test]
    fn test_third_capture_ends_match() {
        let mut controller = MatchController::new(&settings());
        let auth = Authority::own(MASTER);
        controller.start(auth);
        assert_eq!(controller.phase(), MatchPhase::Running);

        let team_a = TeamId(0);
        assert!(!controller.add_score(auth, team_a, 1).unwrap().ending);
        assert!(!controller.add_score(auth, team_a, 1).unwrap().ending);
        assert_eq!(controller.phase(), MatchPhase::Running);

        let change = controller.add_score(auth, team_a, 1).unwrap();
        assert!(change.ending);
        assert_eq!(change.update.unwrap().value, vec![3, 0]);
        assert_eq!(controller.phase(), MatchPhase::Ending);

        let result = controller.result().unwrap();
        assert_eq!(result, MatchResult::Winner(team_a));
        assert_eq!(result.message(controller.settings()), "BLUE TEAM WINS");
    }

    #[test]
    fn test_end_delay_finishes_on_owner() {
        let mut controller = MatchController::new(&settings());
        let auth = Authority::own(MASTER);
        controller.start(auth);
        for _ in 0..3 {
            controller.add_score(auth, TeamId(1), 1).unwrap();
        }
        assert_eq!(controller.tick(auth, 4.0), MatchTick::Nothing);
        assert_eq!(controller.tick(auth, 1.0), MatchTick::Finished);
        assert_eq!(controller.phase(), MatchPhase::Ended);
        assert_eq!(controller.tick(auth, 1.0), MatchTick::Nothing);
    }

    #[test]
    fn test_time_up_ends_only_on_owner() {
        let mut owner = MatchController::new(&settings());
        let mut remote = MatchController::new(&settings());
        let remote_auth = Authority::new(ActorId(2), Some(MASTER));
        owner.start(Authority::own(MASTER));
        remote.start(remote_auth);

        assert_eq!(owner.tick(Authority::own(MASTER), 301.0), MatchTick::EndingStarted);
        assert_eq!(remote.tick(remote_auth, 301.0), MatchTick::Nothing);
        assert_eq!(remote.phase(), MatchPhase::Running);
        assert_eq!(owner.result(), Some(MatchResult::Draw));

        assert_eq!(remote.on_ending(owner.scores()), MatchResult::Draw);
        assert_eq!(remote.phase(), MatchPhase::Ending);
    }

    #[test]
    fn test_new_owner_finishes_ending() {
        let mut owner = MatchController::new(&settings());
        let mut remote = MatchController::new(&settings());
        let heir = ActorId(2);
        let before = Authority::new(heir, Some(MASTER));
        owner.start(Authority::own(MASTER));
        remote.start(before);
        owner.tick(Authority::own(MASTER), 301.0);
        remote.tick(before, 301.0);
        remote.on_ending(owner.scores());

        // the delay runs out while someone else still owns the match
        assert_eq!(remote.tick(before, 6.0), MatchTick::Nothing);
        assert_eq!(remote.phase(), MatchPhase::Ending);

        remote.adopt();
        assert_eq!(remote.tick(Authority::own(heir), 0.0), MatchTick::Finished);
        assert_eq!(remote.phase(), MatchPhase::Ended);
    }

    #[test]
    fn test_new_owner_ends_expired_clock() {
        let mut remote = MatchController::new(&settings());
        let heir = ActorId(2);
        remote.start(Authority::new(heir, Some(MASTER)));
        assert_eq!(remote.tick(Authority::new(heir, Some(MASTER)), 301.0), MatchTick::Nothing);

        remote.adopt();
        assert_eq!(remote.tick(Authority::own(heir), 0.0), MatchTick::EndingStarted);
        assert_eq!(remote.phase(), MatchPhase::Ending);
    }

    #[test]
    fn test_non_owner_cannot_score() {
        let mut controller = MatchController::new(&settings());
        controller.start(Authority::new(ActorId(2), Some(MASTER)));
        assert!(controller
            .add_score(Authority::new(ActorId(2), Some(MASTER)), TeamId(0), 1)
            .is_err());
        assert_eq!(controller.scores(), &[0, 0]);
    }

    #[test]
    fn test_result_comparison() {
        assert_eq!(MatchResult::from_scores(&[2, 2]), MatchResult::Draw);
        assert_eq!(MatchResult::from_scores(&[1, 2]), MatchResult::Winner(TeamId(1)));
        assert_eq!(MatchResult::from_scores(&[]), MatchResult::Draw);
    }

    #[test]
    fn test_countdown_floors_remaining_seconds() {
        let mut controller = MatchController::new(&settings());
        controller.start(Authority::own(MASTER));
        controller.tick(Authority::own(MASTER), 0.5);
        assert_eq!(controller.countdown_secs(), 299);
    }
}
