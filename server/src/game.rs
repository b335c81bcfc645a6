//! Match state machine: phase cycle, scores, objectives and the binary
//! snapshot broadcast to clients.

use crate::config::MatchConfig;
use crate::traits::{MapInfo, NotificationSink, TeamRoster};
use crate::utils::get_timestamp;
use log::{debug, info};
use shared::{ByteReader, ByteWriter};
use std::sync::Arc;

/// Points awarded to a team for capturing an objective.
pub const CAPTURE_SCORE: u32 = 10;

/// Preparation auto-advances to an active round after this window.
pub const PREPARATION_WINDOW_MS: u64 = 30_000;

/// Post-round results are shown for this window before the next phase.
pub const POST_ROUND_WINDOW_MS: u64 = 15_000;

/// Fine-grained match phase, encoded as a single byte in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GamePhase {
    Waiting = 0,
    Preparation = 1,
    Active = 2,
    PostRound = 3,
    MapChanging = 4,
}

impl GamePhase {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire byte; unknown values fall back to Waiting.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => GamePhase::Preparation,
            2 => GamePhase::Active,
            3 => GamePhase::PostRound,
            4 => GamePhase::MapChanging,
            _ => GamePhase::Waiting,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GamePhase::Waiting => "Waiting",
            GamePhase::Preparation => "Preparation",
            GamePhase::Active => "Active",
            GamePhase::PostRound => "PostRound",
            GamePhase::MapChanging => "MapChanging",
        }
    }
}

/// Coarse match lifecycle, encoded as a single byte in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MatchState {
    NotStarted = 0,
    InProgress = 1,
    Paused = 2,
    Finished = 3,
}

impl MatchState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire byte; unknown values fall back to NotStarted.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MatchState::InProgress,
            2 => MatchState::Paused,
            3 => MatchState::Finished,
            _ => MatchState::NotStarted,
        }
    }
}

/// One capturable objective. Team 0 means neutral.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveState {
    pub objective_id: u32,
    pub controlling_team: u32,
    pub capture_progress: f32,
    pub is_neutral: bool,
    pub last_capture_time: u64,
}

impl ObjectiveState {
    pub fn new(objective_id: u32) -> Self {
        Self {
            objective_id,
            controlling_team: 0,
            capture_progress: 0.0,
            is_neutral: true,
            last_capture_time: 0,
        }
    }
}

/// Per-team scoreboard record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamScore {
    pub team_id: u32,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    pub objectives_captured: u32,
}

impl TeamScore {
    pub fn new(team_id: u32) -> Self {
        Self {
            team_id,
            score: 0,
            kills: 0,
            deaths: 0,
            objectives_captured: 0,
        }
    }
}

/// Client-side view of a decoded snapshot. The remaining-time field on
/// the wire is deliberately not surfaced here; recipients recompute
/// countdowns locally instead of trusting a possibly-stale value.
#[derive(Debug, Clone, PartialEq)]
pub struct GameStateSnapshot {
    pub phase: GamePhase,
    pub match_state: MatchState,
    pub current_round: u32,
    pub teams: Vec<TeamScore>,
    pub objectives: Vec<ObjectiveState>,
}

impl GameStateSnapshot {
    pub fn empty() -> Self {
        Self {
            phase: GamePhase::Waiting,
            match_state: MatchState::NotStarted,
            current_round: 0,
            teams: Vec::new(),
            objectives: Vec::new(),
        }
    }
}

/// Authoritative match state. All mutation goes through the methods
/// here so that phase logging and snapshot broadcasts stay consistent;
/// collaborators receive read access via getters only.
///
/// The struct is single-owner and not internally locked. Exactly one
/// logic thread may mutate it.
pub struct GameState {
    current_phase: GamePhase,
    match_state: MatchState,
    current_round: u32,
    max_rounds: u32,
    round_start_time: u64,
    round_end_time: u64,
    phase_start_time: u64,
    objectives: Vec<ObjectiveState>,
    team_scores: Vec<TeamScore>,
    winning_team: u32,
    win_reason: String,
    score_limit: u32,
    objective_limit: u32,
    round_duration_ms: u64,
    paused_at: u64,
    roster: Arc<dyn TeamRoster>,
    map: Arc<dyn MapInfo>,
    sink: Arc<dyn NotificationSink>,
}

impl GameState {
    /// Builds a fresh match in the Waiting phase. Team records are
    /// created in ascending team-id order (ids 1..=team_count), which
    /// is also the deterministic tie-break order for win evaluation.
    pub fn new(
        config: &MatchConfig,
        roster: Arc<dyn TeamRoster>,
        map: Arc<dyn MapInfo>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let team_scores = (1..=roster.team_count()).map(TeamScore::new).collect();
        let objectives = map
            .objective_ids()
            .into_iter()
            .map(ObjectiveState::new)
            .collect();

        Self {
            current_phase: GamePhase::Waiting,
            match_state: MatchState::NotStarted,
            current_round: 0,
            max_rounds: config.max_rounds,
            round_start_time: 0,
            round_end_time: 0,
            phase_start_time: 0,
            objectives,
            team_scores,
            winning_team: 0,
            win_reason: String::new(),
            score_limit: config.score_limit,
            objective_limit: config.objective_limit,
            round_duration_ms: config.round_duration_ms,
            paused_at: 0,
            roster,
            map,
            sink,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.current_phase
    }

    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn winning_team(&self) -> u32 {
        self.winning_team
    }

    pub fn win_reason(&self) -> &str {
        &self.win_reason
    }

    pub fn team_scores(&self) -> &[TeamScore] {
        &self.team_scores
    }

    pub fn objectives(&self) -> &[ObjectiveState] {
        &self.objectives
    }

    pub fn team_score(&self, team_id: u32) -> Option<&TeamScore> {
        self.team_scores.iter().find(|t| t.team_id == team_id)
    }

    /// Seconds until the round deadline, negative once it has passed,
    /// 0 when no deadline is armed.
    pub fn remaining_time_secs(&self, now_ms: u64) -> i64 {
        if self.round_end_time == 0 {
            return 0;
        }
        (self.round_end_time as i64 - now_ms as i64) / 1000
    }

    /// Starts the match when enough players are present. Returns true
    /// on the Waiting→Preparation transition, false when still waiting.
    pub fn try_begin_match(&mut self) -> bool {
        self.try_begin_match_at(get_timestamp())
    }

    pub(crate) fn try_begin_match_at(&mut self, now_ms: u64) -> bool {
        if self.current_phase != GamePhase::Waiting {
            return false;
        }
        if !self.roster.has_enough_players() {
            return false;
        }

        self.current_round = 0;
        self.winning_team = 0;
        self.win_reason.clear();
        for team in &mut self.team_scores {
            *team = TeamScore::new(team.team_id);
        }
        self.reset_objectives();

        self.match_state = MatchState::InProgress;
        info!("Match starting with {} team(s)", self.team_scores.len());
        self.set_phase_at(GamePhase::Preparation, now_ms);
        true
    }

    /// Preparation→Active. Increments the round counter, stamps the
    /// round deadline and resets objectives for a fresh capture race.
    /// No-op outside the Preparation phase.
    pub fn start_round(&mut self) {
        self.start_round_at(get_timestamp())
    }

    pub(crate) fn start_round_at(&mut self, now_ms: u64) {
        if self.current_phase != GamePhase::Preparation {
            return;
        }

        self.current_round += 1;
        self.round_start_time = now_ms;
        self.round_end_time = if self.round_duration_ms > 0 {
            now_ms + self.round_duration_ms
        } else {
            0
        };
        self.winning_team = 0;
        self.win_reason.clear();
        self.reset_objectives();

        self.set_phase_at(GamePhase::Active, now_ms);
        self.sink
            .broadcast_notice(&format!("Round {} started", self.current_round));
    }

    /// Active→PostRound with win bookkeeping. Team 0 marks a round
    /// without a winner. No-op outside the Active phase.
    pub fn end_round(&mut self, winning_team: u32, reason: &str) {
        self.end_round_at(winning_team, reason, get_timestamp())
    }

    pub(crate) fn end_round_at(&mut self, winning_team: u32, reason: &str, now_ms: u64) {
        if self.current_phase != GamePhase::Active {
            return;
        }

        self.winning_team = winning_team;
        self.win_reason = reason.to_string();
        info!(
            "Round {} ended: team {} ({})",
            self.current_round, winning_team, reason
        );
        let notice = if winning_team != 0 {
            format!("Team {} wins the round: {}", winning_team, reason)
        } else {
            format!("Round over: {}", reason)
        };
        self.sink.broadcast_notice(&notice);
        self.set_phase_at(GamePhase::PostRound, now_ms);
    }

    /// Forces the next step of the linear phase cycle without waiting
    /// for timers or win conditions.
    pub fn advance_phase(&mut self) {
        self.advance_phase_at(get_timestamp())
    }

    pub(crate) fn advance_phase_at(&mut self, now_ms: u64) {
        match self.current_phase {
            GamePhase::Waiting => self.set_phase_at(GamePhase::Preparation, now_ms),
            GamePhase::Preparation => self.start_round_at(now_ms),
            GamePhase::Active => self.end_round_at(0, "Round ended", now_ms),
            GamePhase::PostRound => {
                if self.max_rounds == 0 || self.current_round < self.max_rounds {
                    self.set_phase_at(GamePhase::Preparation, now_ms);
                } else {
                    self.match_state = MatchState::Finished;
                    info!("Match finished after {} round(s)", self.current_round);
                    self.set_phase_at(GamePhase::MapChanging, now_ms);
                    self.sink.broadcast_notice("Match finished");
                }
            }
            GamePhase::MapChanging => {
                self.match_state = MatchState::NotStarted;
                self.set_phase_at(GamePhase::Waiting, now_ms);
            }
        }
    }

    /// Timer-driven progression, called once per server tick. Inert
    /// while the match is paused.
    pub fn update(&mut self) {
        self.update_at(get_timestamp())
    }

    pub(crate) fn update_at(&mut self, now_ms: u64) {
        if self.match_state == MatchState::Paused {
            return;
        }

        match self.current_phase {
            GamePhase::Waiting => {
                if self.match_state == MatchState::NotStarted {
                    self.try_begin_match_at(now_ms);
                }
            }
            GamePhase::Preparation => {
                if now_ms.saturating_sub(self.phase_start_time) >= PREPARATION_WINDOW_MS {
                    self.start_round_at(now_ms);
                }
            }
            GamePhase::Active => {
                self.check_win_condition_at(now_ms);
            }
            GamePhase::PostRound => {
                if now_ms.saturating_sub(self.phase_start_time) >= POST_ROUND_WINDOW_MS {
                    self.advance_phase_at(now_ms);
                }
            }
            GamePhase::MapChanging => {
                self.advance_phase_at(now_ms);
            }
        }
    }

    /// Evaluates win conditions in strict priority order and ends the
    /// round on the first hit. Only meaningful while Active; returns
    /// whether a winner was found.
    ///
    /// Priority: round time expired (highest score wins, ties go to the
    /// lowest team id), score limit, objective limit, all objectives
    /// held by one team.
    pub fn check_win_condition(&mut self) -> bool {
        self.check_win_condition_at(get_timestamp())
    }

    pub(crate) fn check_win_condition_at(&mut self, now_ms: u64) -> bool {
        if self.current_phase != GamePhase::Active {
            return false;
        }

        if self.round_end_time > 0 && now_ms >= self.round_end_time {
            let mut best: Option<(u32, u32)> = None;
            for team in &self.team_scores {
                if best.map_or(true, |(_, score)| team.score > score) {
                    best = Some((team.team_id, team.score));
                }
            }
            let winner = best.map(|(id, _)| id).unwrap_or(0);
            self.end_round_at(winner, "Time limit reached", now_ms);
            return true;
        }

        if self.score_limit > 0 {
            let winner = self
                .team_scores
                .iter()
                .find(|t| t.score >= self.score_limit)
                .map(|t| t.team_id);
            if let Some(team_id) = winner {
                self.end_round_at(team_id, "Score limit reached", now_ms);
                return true;
            }
        }

        if self.objective_limit > 0 {
            let winner = self
                .team_scores
                .iter()
                .find(|t| t.objectives_captured >= self.objective_limit)
                .map(|t| t.team_id);
            if let Some(team_id) = winner {
                self.end_round_at(team_id, "Objective limit reached", now_ms);
                return true;
            }
        }

        if !self.objectives.is_empty() {
            let holder = self.objectives[0].controlling_team;
            let swept = holder != 0
                && self
                    .objectives
                    .iter()
                    .all(|o| o.controlling_team == holder && !o.is_neutral);
            if swept {
                self.end_round_at(holder, "All objectives captured", now_ms);
                return true;
            }
        }

        false
    }

    /// Records capture progress reported for an objective, clamped to
    /// [0, 1]. Full progress by a team that does not already control
    /// the objective triggers a capture.
    pub fn update_objective(&mut self, objective_id: u32, team: u32, progress: f32) {
        self.update_objective_at(objective_id, team, progress, get_timestamp())
    }

    pub(crate) fn update_objective_at(
        &mut self,
        objective_id: u32,
        team: u32,
        progress: f32,
        now_ms: u64,
    ) {
        let idx = match self.objectives.iter().position(|o| o.objective_id == objective_id) {
            Some(idx) => idx,
            None => {
                debug!("Progress report for unknown objective {}", objective_id);
                return;
            }
        };

        let clamped = progress.clamp(0.0, 1.0);
        self.objectives[idx].capture_progress = clamped;

        let controller = self.objectives[idx].controlling_team;
        if clamped >= 1.0 && team != 0 && controller != team {
            self.capture_objective_at(objective_id, team, now_ms);
        }
    }

    /// Hands control of an objective to `team`: fixed score award,
    /// capture counter, notice and snapshot broadcast, then an
    /// opportunistic win check. No-op for unknown objectives, unknown
    /// teams, or the current controller re-capturing.
    pub fn capture_objective(&mut self, objective_id: u32, team: u32) {
        self.capture_objective_at(objective_id, team, get_timestamp())
    }

    pub(crate) fn capture_objective_at(&mut self, objective_id: u32, team: u32, now_ms: u64) {
        let idx = match self.objectives.iter().position(|o| o.objective_id == objective_id) {
            Some(idx) => idx,
            None => {
                debug!("Capture of unknown objective {}", objective_id);
                return;
            }
        };
        if self.objectives[idx].controlling_team == team {
            return;
        }
        if team == 0 || !self.team_known(team) {
            debug!("Capture of objective {} by unknown team {}", objective_id, team);
            return;
        }

        {
            let objective = &mut self.objectives[idx];
            objective.controlling_team = team;
            objective.capture_progress = 1.0;
            objective.is_neutral = false;
            objective.last_capture_time = now_ms;
        }
        if let Some(record) = self.team_scores.iter_mut().find(|t| t.team_id == team) {
            record.score += CAPTURE_SCORE;
            record.objectives_captured += 1;
        }

        info!("Team {} captured objective {}", team, objective_id);
        self.sink
            .broadcast_notice(&format!("Team {} captured objective {}", team, objective_id));
        self.broadcast_state_at(now_ms);
        self.check_win_condition_at(now_ms);
    }

    /// Adds to a team's score and broadcasts the snapshot. No-op for
    /// unknown team ids.
    pub fn add_team_score(&mut self, team: u32, amount: u32) {
        self.add_team_score_at(team, amount, get_timestamp())
    }

    pub(crate) fn add_team_score_at(&mut self, team: u32, amount: u32, now_ms: u64) {
        if let Some(record) = self.team_scores.iter_mut().find(|t| t.team_id == team) {
            record.score += amount;
            self.broadcast_state_at(now_ms);
        }
    }

    /// Overwrites a team's score and broadcasts the snapshot.
    pub fn set_team_score(&mut self, team: u32, value: u32) {
        self.set_team_score_at(team, value, get_timestamp())
    }

    pub(crate) fn set_team_score_at(&mut self, team: u32, value: u32, now_ms: u64) {
        if let Some(record) = self.team_scores.iter_mut().find(|t| t.team_id == team) {
            record.score = value;
            self.broadcast_state_at(now_ms);
        }
    }

    pub fn add_team_kill(&mut self, team: u32) {
        if let Some(record) = self.team_scores.iter_mut().find(|t| t.team_id == team) {
            record.kills += 1;
        }
    }

    pub fn add_team_death(&mut self, team: u32) {
        if let Some(record) = self.team_scores.iter_mut().find(|t| t.team_id == team) {
            record.deaths += 1;
        }
    }

    /// Freezes timers while keeping all scores and phase state.
    pub fn pause_match(&mut self) {
        self.pause_match_at(get_timestamp())
    }

    pub(crate) fn pause_match_at(&mut self, now_ms: u64) {
        if self.match_state != MatchState::InProgress {
            return;
        }
        self.match_state = MatchState::Paused;
        self.paused_at = now_ms;
        info!("Match paused");
        self.sink.broadcast_notice("Match paused");
        self.broadcast_state_at(now_ms);
    }

    /// Resumes a paused match, shifting the round deadline and the
    /// phase timer forward by the length of the pause.
    pub fn resume_match(&mut self) {
        self.resume_match_at(get_timestamp())
    }

    pub(crate) fn resume_match_at(&mut self, now_ms: u64) {
        if self.match_state != MatchState::Paused {
            return;
        }
        let pause_len = now_ms.saturating_sub(self.paused_at);
        if self.round_end_time > 0 {
            self.round_end_time += pause_len;
        }
        self.phase_start_time += pause_len;
        self.paused_at = 0;
        self.match_state = MatchState::InProgress;
        info!("Match resumed after {} ms", pause_len);
        self.sink.broadcast_notice("Match resumed");
        self.broadcast_state_at(now_ms);
    }

    /// Encodes the fixed-layout snapshot. Remaining time is recomputed
    /// from the deadline at encode time, never stored.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_at(get_timestamp())
    }

    pub(crate) fn serialize_at(&self, now_ms: u64) -> Vec<u8> {
        let mut writer =
            ByteWriter::with_capacity(18 + self.team_scores.len() * 20 + 4 + self.objectives.len() * 21);
        writer.put_u8(self.current_phase.as_u8());
        writer.put_u8(self.match_state.as_u8());
        writer.put_u32(self.current_round);
        writer.put_i64(self.remaining_time_secs(now_ms));

        writer.put_u32(self.team_scores.len() as u32);
        for team in &self.team_scores {
            writer.put_u32(team.team_id);
            writer.put_u32(team.score);
            writer.put_u32(team.kills);
            writer.put_u32(team.deaths);
            writer.put_u32(team.objectives_captured);
        }

        writer.put_u32(self.objectives.len() as u32);
        for objective in &self.objectives {
            writer.put_u32(objective.objective_id);
            writer.put_u32(objective.controlling_team);
            writer.put_f32(objective.capture_progress);
            writer.put_u8(objective.is_neutral as u8);
            writer.put_u64(objective.last_capture_time);
        }

        writer.into_vec()
    }

    /// Pushes the current snapshot through the notification sink.
    pub fn broadcast_state(&self) {
        self.broadcast_state_at(get_timestamp())
    }

    pub(crate) fn broadcast_state_at(&self, now_ms: u64) {
        self.sink.broadcast_state(&self.serialize_at(now_ms));
    }

    fn set_phase_at(&mut self, phase: GamePhase, now_ms: u64) {
        if self.current_phase == phase {
            return;
        }
        info!("Phase transition: {:?} -> {:?}", self.current_phase, phase);
        self.current_phase = phase;
        self.phase_start_time = now_ms;
        self.sink
            .broadcast_notice(&format!("Phase changed to {}", phase.name()));
        self.broadcast_state_at(now_ms);
    }

    fn reset_objectives(&mut self) {
        self.objectives = self
            .map
            .objective_ids()
            .into_iter()
            .map(ObjectiveState::new)
            .collect();
    }

    fn team_known(&self, team: u32) -> bool {
        self.team_scores.iter().any(|t| t.team_id == team)
    }
}

/// Decodes a snapshot defensively: reads as much as the buffer holds
/// and returns a partial result instead of an error on truncation. The
/// wire remaining-time field is consumed but discarded.
pub fn deserialize_game_state(data: &[u8]) -> GameStateSnapshot {
    let mut snapshot = GameStateSnapshot::empty();
    let mut reader = ByteReader::new(data);

    snapshot.phase = match reader.read_u8() {
        Some(byte) => GamePhase::from_u8(byte),
        None => return snapshot,
    };
    snapshot.match_state = match reader.read_u8() {
        Some(byte) => MatchState::from_u8(byte),
        None => return snapshot,
    };
    snapshot.current_round = match reader.read_u32() {
        Some(round) => round,
        None => return snapshot,
    };
    if reader.read_i64().is_none() {
        return snapshot;
    }

    let team_count = match reader.read_u32() {
        Some(count) => count,
        None => return snapshot,
    };
    for _ in 0..team_count {
        match read_team_record(&mut reader) {
            Some(team) => snapshot.teams.push(team),
            None => return snapshot,
        }
    }

    let objective_count = match reader.read_u32() {
        Some(count) => count,
        None => return snapshot,
    };
    for _ in 0..objective_count {
        match read_objective_record(&mut reader) {
            Some(objective) => snapshot.objectives.push(objective),
            None => return snapshot,
        }
    }

    snapshot
}

fn read_team_record(reader: &mut ByteReader) -> Option<TeamScore> {
    Some(TeamScore {
        team_id: reader.read_u32()?,
        score: reader.read_u32()?,
        kills: reader.read_u32()?,
        deaths: reader.read_u32()?,
        objectives_captured: reader.read_u32()?,
    })
}

fn read_objective_record(reader: &mut ByteReader) -> Option<ObjectiveState> {
    Some(ObjectiveState {
        objective_id: reader.read_u32()?,
        controlling_team: reader.read_u32()?,
        capture_progress: reader.read_f32()?,
        is_neutral: reader.read_u8()? != 0,
        last_capture_time: reader.read_u64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestSink {
        notices: Mutex<Vec<String>>,
        snapshots: Mutex<Vec<Vec<u8>>>,
    }

    impl NotificationSink for TestSink {
        fn broadcast_state(&self, data: &[u8]) {
            self.snapshots.lock().unwrap().push(data.to_vec());
        }

        fn broadcast_notice(&self, text: &str) {
            self.notices.lock().unwrap().push(text.to_string());
        }
    }

    impl TestSink {
        fn has_notice(&self, needle: &str) -> bool {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .any(|n| n.contains(needle))
        }
    }

    struct TestRoster {
        teams: u32,
        ready: bool,
    }

    impl TeamRoster for TestRoster {
        fn team_count(&self) -> u32 {
            self.teams
        }

        fn has_enough_players(&self) -> bool {
            self.ready
        }
    }

    struct TestMap {
        ids: Vec<u32>,
    }

    impl MapInfo for TestMap {
        fn objective_ids(&self) -> Vec<u32> {
            self.ids.clone()
        }
    }

    fn test_config() -> MatchConfig {
        MatchConfig {
            max_rounds: 2,
            round_duration_ms: 60_000,
            preparation_duration_ms: 30_000,
            score_limit: 100,
            objective_limit: 5,
        }
    }

    fn test_game(teams: u32, objective_count: u32) -> (GameState, Arc<TestSink>) {
        test_game_with(test_config(), teams, objective_count, true)
    }

    fn test_game_with(
        config: MatchConfig,
        teams: u32,
        objective_count: u32,
        ready: bool,
    ) -> (GameState, Arc<TestSink>) {
        let sink = Arc::new(TestSink::default());
        let roster = Arc::new(TestRoster { teams, ready });
        let map = Arc::new(TestMap {
            ids: (1..=objective_count).collect(),
        });
        let game = GameState::new(&config, roster, map, Arc::clone(&sink) as Arc<dyn NotificationSink>);
        (game, sink)
    }

    /// Drives a fresh game into an active round at the given time.
    fn start_active_round(game: &mut GameState, now_ms: u64) {
        assert!(game.try_begin_match_at(now_ms));
        game.start_round_at(now_ms);
        assert_eq!(game.phase(), GamePhase::Active);
    }

    #[test]
    fn test_initial_state() {
        let (game, _) = test_game(2, 3);
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(game.match_state(), MatchState::NotStarted);
        assert_eq!(game.current_round(), 0);
        assert_eq!(game.team_scores().len(), 2);
        assert_eq!(game.team_scores()[0].team_id, 1);
        assert_eq!(game.team_scores()[1].team_id, 2);
        assert!(game.objectives().iter().all(|o| o.is_neutral && o.controlling_team == 0));
    }

    #[test]
    fn test_begin_match_requires_roster() {
        let (mut game, _) = test_game_with(test_config(), 2, 1, false);
        assert!(!game.try_begin_match_at(1000));
        assert_eq!(game.phase(), GamePhase::Waiting);

        let (mut game, sink) = test_game(2, 1);
        assert!(game.try_begin_match_at(1000));
        assert_eq!(game.phase(), GamePhase::Preparation);
        assert_eq!(game.match_state(), MatchState::InProgress);
        assert!(sink.has_notice("Phase changed to Preparation"));
    }

    #[test]
    fn test_round_flow() {
        let (mut game, sink) = test_game(2, 1);
        start_active_round(&mut game, 1000);
        assert_eq!(game.current_round(), 1);
        assert!(sink.has_notice("Round 1 started"));

        game.end_round_at(1, "Score limit reached", 2000);
        assert_eq!(game.phase(), GamePhase::PostRound);
        assert_eq!(game.winning_team(), 1);
        assert_eq!(game.win_reason(), "Score limit reached");
        assert!(sink.has_notice("Team 1 wins the round"));
    }

    #[test]
    fn test_transitions_are_phase_guarded() {
        let (mut game, _) = test_game(2, 1);

        // Not in Preparation: starting a round does nothing
        game.start_round_at(1000);
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(game.current_round(), 0);

        // Not in Active: ending a round does nothing
        game.end_round_at(1, "nope", 1000);
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(game.winning_team(), 0);
    }

    #[test]
    fn test_update_auto_advances_preparation() {
        let (mut game, _) = test_game(2, 1);
        game.try_begin_match_at(1000);

        game.update_at(1000 + PREPARATION_WINDOW_MS - 1);
        assert_eq!(game.phase(), GamePhase::Preparation);

        game.update_at(1000 + PREPARATION_WINDOW_MS);
        assert_eq!(game.phase(), GamePhase::Active);
        assert_eq!(game.current_round(), 1);
    }

    #[test]
    fn test_update_auto_advances_post_round() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);
        game.end_round_at(1, "Score limit reached", 2000);

        game.update_at(2000 + POST_ROUND_WINDOW_MS - 1);
        assert_eq!(game.phase(), GamePhase::PostRound);

        // Round 1 of 2: back to Preparation for the next round
        game.update_at(2000 + POST_ROUND_WINDOW_MS);
        assert_eq!(game.phase(), GamePhase::Preparation);
        assert_eq!(game.match_state(), MatchState::InProgress);
    }

    #[test]
    fn test_match_finishes_after_max_rounds() {
        let config = MatchConfig {
            max_rounds: 1,
            ..test_config()
        };
        let (mut game, sink) = test_game_with(config, 2, 1, true);
        start_active_round(&mut game, 1000);
        game.end_round_at(2, "Score limit reached", 2000);

        game.advance_phase_at(3000);
        assert_eq!(game.phase(), GamePhase::MapChanging);
        assert_eq!(game.match_state(), MatchState::Finished);
        assert!(sink.has_notice("Match finished"));

        game.advance_phase_at(4000);
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(game.match_state(), MatchState::NotStarted);
    }

    #[test]
    fn test_progress_clamped() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);

        game.update_objective_at(1, 0, -0.3, 1100);
        assert_approx_eq!(game.objectives()[0].capture_progress, 0.0, 1e-6);

        game.update_objective_at(1, 0, 0.5, 1200);
        assert_approx_eq!(game.objectives()[0].capture_progress, 0.5, 1e-6);

        // Above 1.0 clamps and, with a reporting team, captures
        game.update_objective_at(1, 1, 1.7, 1300);
        assert_approx_eq!(game.objectives()[0].capture_progress, 1.0, 1e-6);
        assert_eq!(game.objectives()[0].controlling_team, 1);
    }

    #[test]
    fn test_capture_awards_fixed_score() {
        let (mut game, sink) = test_game(2, 2);
        start_active_round(&mut game, 1000);

        game.capture_objective_at(1, 1, 1500);
        let team = game.team_score(1).unwrap();
        assert_eq!(team.score, CAPTURE_SCORE);
        assert_eq!(team.objectives_captured, 1);
        let objective = &game.objectives()[0];
        assert_eq!(objective.controlling_team, 1);
        assert!(!objective.is_neutral);
        assert_eq!(objective.last_capture_time, 1500);
        assert!(sink.has_notice("Team 1 captured objective 1"));

        // Re-capturing an objective you already hold is a no-op
        game.capture_objective_at(1, 1, 1600);
        assert_eq!(game.team_score(1).unwrap().score, CAPTURE_SCORE);
        assert_eq!(game.team_score(1).unwrap().objectives_captured, 1);
    }

    #[test]
    fn test_capture_ignores_unknown_ids() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);

        game.capture_objective_at(99, 1, 1500);
        assert_eq!(game.objectives()[0].controlling_team, 0);

        game.capture_objective_at(1, 9, 1500);
        assert_eq!(game.objectives()[0].controlling_team, 0);
        assert!(game.team_scores().iter().all(|t| t.score == 0));
    }

    #[test]
    fn test_win_by_score_limit() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);

        game.add_team_score_at(2, 99, 1100);
        assert!(!game.check_win_condition_at(1200));

        game.add_team_score_at(2, 1, 1300);
        assert!(game.check_win_condition_at(1400));
        assert_eq!(game.winning_team(), 2);
        assert_eq!(game.win_reason(), "Score limit reached");
        assert_eq!(game.phase(), GamePhase::PostRound);
    }

    #[test]
    fn test_win_by_objective_limit() {
        let config = MatchConfig {
            objective_limit: 2,
            score_limit: 0,
            ..test_config()
        };
        let (mut game, _) = test_game_with(config, 2, 3, true);
        start_active_round(&mut game, 1000);

        game.capture_objective_at(1, 1, 1100);
        assert_eq!(game.phase(), GamePhase::Active);

        // Second capture hits the limit via the opportunistic check
        game.capture_objective_at(2, 1, 1200);
        assert_eq!(game.phase(), GamePhase::PostRound);
        assert_eq!(game.winning_team(), 1);
        assert_eq!(game.win_reason(), "Objective limit reached");
    }

    #[test]
    fn test_win_by_holding_all_objectives() {
        let config = MatchConfig {
            score_limit: 0,
            objective_limit: 0,
            ..test_config()
        };
        let (mut game, _) = test_game_with(config, 2, 2, true);
        start_active_round(&mut game, 1000);

        game.capture_objective_at(1, 2, 1100);
        assert_eq!(game.phase(), GamePhase::Active);

        game.capture_objective_at(2, 2, 1200);
        assert_eq!(game.phase(), GamePhase::PostRound);
        assert_eq!(game.winning_team(), 2);
        assert_eq!(game.win_reason(), "All objectives captured");
    }

    #[test]
    fn test_win_by_time_highest_score() {
        let (mut game, _) = test_game(3, 1);
        start_active_round(&mut game, 1000);
        game.add_team_score_at(3, 40, 1100);
        game.add_team_score_at(1, 20, 1200);

        assert!(!game.check_win_condition_at(60_999));
        assert!(game.check_win_condition_at(61_000));
        assert_eq!(game.winning_team(), 3);
        assert_eq!(game.win_reason(), "Time limit reached");
    }

    #[test]
    fn test_time_expiry_tie_goes_to_lowest_team_id() {
        let (mut game, _) = test_game(3, 1);
        start_active_round(&mut game, 1000);
        game.add_team_score_at(2, 30, 1100);
        game.add_team_score_at(3, 30, 1200);

        assert!(game.check_win_condition_at(61_000));
        assert_eq!(game.winning_team(), 2);
    }

    #[test]
    fn test_score_mutations() {
        let (mut game, sink) = test_game(2, 1);
        start_active_round(&mut game, 1000);
        let broadcasts_before = sink.snapshots.lock().unwrap().len();

        game.set_team_score_at(1, 42, 1100);
        assert_eq!(game.team_score(1).unwrap().score, 42);
        game.add_team_kill(1);
        game.add_team_kill(1);
        game.add_team_death(2);
        assert_eq!(game.team_score(1).unwrap().kills, 2);
        assert_eq!(game.team_score(2).unwrap().deaths, 1);

        // Unknown team ids are ignored
        game.add_team_score_at(7, 5, 1200);
        game.add_team_kill(7);
        assert!(game.team_score(7).is_none());

        // Only the score changes pushed snapshots
        assert_eq!(sink.snapshots.lock().unwrap().len(), broadcasts_before + 1);
    }

    #[test]
    fn test_pause_freezes_update_and_resume_shifts_deadline() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);
        let remaining = game.remaining_time_secs(1000);

        game.pause_match_at(31_000);
        assert_eq!(game.match_state(), MatchState::Paused);

        // Paused: the round deadline passing has no effect
        game.update_at(200_000);
        assert_eq!(game.phase(), GamePhase::Active);

        // A 169-second pause pushes the deadline out by the same amount
        game.resume_match_at(200_000);
        assert_eq!(game.match_state(), MatchState::InProgress);
        assert_eq!(game.remaining_time_secs(170_000), remaining);
        assert!(!game.check_win_condition_at(200_001));
    }

    #[test]
    fn test_resume_only_from_paused() {
        let (mut game, _) = test_game(2, 1);
        start_active_round(&mut game, 1000);
        game.resume_match_at(2000);
        assert_eq!(game.match_state(), MatchState::InProgress);
        game.pause_match_at(3000);
        game.pause_match_at(4000);
        assert_eq!(game.match_state(), MatchState::Paused);
    }

    #[test]
    fn test_serialize_layout() {
        let (mut game, _) = test_game(1, 1);
        start_active_round(&mut game, 1000);
        game.capture_objective_at(1, 1, 1500);

        let data = game.serialize_at(2000);
        // Header 18 bytes, one 20-byte team record, count, one 21-byte
        // objective record
        assert_eq!(data.len(), 18 + 20 + 4 + 21);
        assert_eq!(data[0], GamePhase::PostRound.as_u8());
        assert_eq!(data[1], MatchState::InProgress.as_u8());
        assert_eq!(u32::from_le_bytes(data[2..6].try_into().unwrap()), 1);

        let remaining = i64::from_le_bytes(data[6..14].try_into().unwrap());
        assert_eq!(remaining, 59);

        assert_eq!(u32::from_le_bytes(data[14..18].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(data[18..22].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(data[22..26].try_into().unwrap()), CAPTURE_SCORE);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (mut game, _) = test_game(2, 2);
        start_active_round(&mut game, 1000);
        game.capture_objective_at(2, 1, 1500);
        game.add_team_kill(1);
        game.add_team_death(2);

        let snapshot = deserialize_game_state(&game.serialize_at(2000));
        assert_eq!(snapshot.phase, game.phase());
        assert_eq!(snapshot.match_state, game.match_state());
        assert_eq!(snapshot.current_round, 1);
        assert_eq!(snapshot.teams, game.team_scores().to_vec());
        assert_eq!(snapshot.objectives, game.objectives().to_vec());
    }

    #[test]
    fn test_truncated_snapshot_decodes_partially() {
        let (mut game, _) = test_game(3, 2);
        start_active_round(&mut game, 1000);
        let data = game.serialize_at(2000);

        // Cut inside the second team record: one full team survives
        let snapshot = deserialize_game_state(&data[..18 + 20 + 10]);
        assert_eq!(snapshot.current_round, 1);
        assert_eq!(snapshot.teams.len(), 1);
        assert!(snapshot.objectives.is_empty());

        // Prefix cut inside the round counter still yields the phase
        let snapshot = deserialize_game_state(&data[..5]);
        assert_eq!(snapshot.phase, GamePhase::Active);
        assert_eq!(snapshot.current_round, 0);

        let snapshot = deserialize_game_state(&[]);
        assert_eq!(snapshot.phase, GamePhase::Waiting);
        assert!(snapshot.teams.is_empty());
    }

    #[test]
    fn test_defensive_enum_decoding() {
        assert_eq!(GamePhase::from_u8(200), GamePhase::Waiting);
        assert_eq!(MatchState::from_u8(200), MatchState::NotStarted);
        assert_eq!(GamePhase::from_u8(2), GamePhase::Active);
        assert_eq!(MatchState::from_u8(3), MatchState::Finished);
    }
}
