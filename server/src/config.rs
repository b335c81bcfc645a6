//! Runtime configuration consumed by the session core
//!
//! Values arrive from the command line (see `main.rs`) or from an
//! embedding application; the defaults here describe a standard
//! two-team objective match.

use shared::tags;
use std::time::Duration;

/// Match pacing and win-condition limits.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Rounds played before the map rotates.
    pub max_rounds: u32,
    /// Length of the active play phase per round.
    pub round_duration_ms: u64,
    /// Length of the pre-round preparation phase.
    pub preparation_duration_ms: u64,
    /// Score that ends the round immediately. 0 disables the limit.
    pub score_limit: u32,
    /// Objective captures that end the round immediately. 0 disables.
    pub objective_limit: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_duration_ms: 300_000,
            preparation_duration_ms: 30_000,
            score_limit: 100,
            objective_limit: 5,
        }
    }
}

/// Anti-cheat and clock-sync policy. Immutable once the session is
/// constructed; there is no hot reload.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Violation count at which a ban is requested.
    pub max_violations: u32,
    /// Packet tags allowed through the gate.
    pub tag_whitelist: Vec<String>,
    /// Age after which an unanswered clock-sync request is evicted.
    pub sync_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_violations: 10,
            tag_whitelist: tags::DEFAULT_WHITELIST
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
            sync_timeout_ms: 5000,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maintenance ticks per second for the game-logic loop.
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Maintenance ticks between clock-sync probes to each client.
    pub sync_interval_ticks: u64,
    pub match_config: MatchConfig,
    pub security: SecurityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 30,
            max_clients: 32,
            sync_interval_ticks: 150,
            match_config: MatchConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(1000 / self.tick_rate.max(1) as u64)
    }
}
