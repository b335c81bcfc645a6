//! Wall-clock round pacing. Owns a single deadline and drives the
//! match state machine through its public transitions; it never
//! mutates scores or phases directly.

use crate::config::MatchConfig;
use crate::game::{GamePhase, GameState, MatchState};
use crate::traits::NotificationSink;
use crate::utils::get_timestamp;
use log::info;
use std::sync::Arc;

/// Results are shown for this long between rounds.
pub const POST_ROUND_DURATION_MS: u64 = 10_000;

/// Coarse pacing phase, one deadline per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Preparation,
    Active,
    PostRound,
}

/// Invoked with the round number on round start/end. Runs
/// synchronously from `update()` and must not block.
pub type RoundCallback = Box<dyn FnMut(u32) + Send>;

/// Deadline-driven pacing controller. Timer expiry moves through the
/// fixed cycle Preparation → Active → PostRound → Preparation, calling
/// the matching `GameState` transition at every step. The state
/// machine's own phase guards keep the two in agreement when a win
/// condition already ended the round early.
pub struct RoundManager {
    phase: RoundPhase,
    /// Absolute deadline in ms; 0 means no deadline is armed.
    phase_end_time: u64,
    preparation_duration_ms: u64,
    round_duration_ms: u64,
    on_round_start: Option<RoundCallback>,
    on_round_end: Option<RoundCallback>,
    sink: Arc<dyn NotificationSink>,
}

impl RoundManager {
    /// Starts in Preparation with the deadline armed from now.
    pub fn new(config: &MatchConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::new_at(config, sink, get_timestamp())
    }

    pub(crate) fn new_at(
        config: &MatchConfig,
        sink: Arc<dyn NotificationSink>,
        now_ms: u64,
    ) -> Self {
        Self {
            phase: RoundPhase::Preparation,
            phase_end_time: now_ms + config.preparation_duration_ms,
            preparation_duration_ms: config.preparation_duration_ms,
            round_duration_ms: config.round_duration_ms,
            on_round_start: None,
            on_round_end: None,
            sink,
        }
    }

    /// Registers the round-start listener. Set once during wiring.
    pub fn set_round_start_callback(&mut self, callback: RoundCallback) {
        self.on_round_start = Some(callback);
    }

    /// Registers the round-end listener. Set once during wiring.
    pub fn set_round_end_callback(&mut self, callback: RoundCallback) {
        self.on_round_end = Some(callback);
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn phase_end_time(&self) -> u64 {
        self.phase_end_time
    }

    /// Rearms a fresh Preparation window, discarding any pending
    /// deadline. Called when a new match begins.
    pub fn reset(&mut self) {
        self.reset_at(get_timestamp())
    }

    pub(crate) fn reset_at(&mut self, now_ms: u64) {
        self.phase = RoundPhase::Preparation;
        self.phase_end_time = now_ms + self.preparation_duration_ms;
    }

    /// Advances the pacing cycle when the deadline has passed. Called
    /// once per server tick while a match is in progress.
    pub fn update(&mut self, game: &mut GameState) {
        self.update_at(game, get_timestamp())
    }

    pub(crate) fn update_at(&mut self, game: &mut GameState, now_ms: u64) {
        if self.phase_end_time == 0 || now_ms < self.phase_end_time {
            return;
        }

        match self.phase {
            RoundPhase::Preparation => {
                self.phase = RoundPhase::Active;
                self.phase_end_time = if self.round_duration_ms > 0 {
                    now_ms + self.round_duration_ms
                } else {
                    0
                };
                game.start_round_at(now_ms);
                let round = game.current_round();
                info!("Round pacing: round {} active", round);
                self.sink
                    .broadcast_notice(&format!("Round {} has begun", round));
                if let Some(callback) = &mut self.on_round_start {
                    callback(round);
                }
            }
            RoundPhase::Active => {
                self.phase = RoundPhase::PostRound;
                self.phase_end_time = now_ms + POST_ROUND_DURATION_MS;
                // A win check first; only a round that nobody won gets
                // force-ended without a winner
                if !game.check_win_condition_at(now_ms) {
                    game.end_round_at(0, "Round time elapsed", now_ms);
                }
                let round = game.current_round();
                info!("Round pacing: round {} finished", round);
                self.sink
                    .broadcast_notice(&format!("Round {} complete", round));
                if let Some(callback) = &mut self.on_round_end {
                    callback(round);
                }
            }
            RoundPhase::PostRound => {
                self.phase = RoundPhase::Preparation;
                self.phase_end_time = now_ms + self.preparation_duration_ms;
                if game.phase() == GamePhase::PostRound {
                    game.advance_phase_at(now_ms);
                }
                if game.match_state() == MatchState::Finished {
                    self.sink.broadcast_notice("Match complete");
                } else {
                    self.sink.broadcast_notice("Next round starting soon");
                }
            }
        }
    }
}
