//! Collaborator interfaces consumed and exposed by the session core
//!
//! The session core never talks to a concrete transport, roster or admin
//! backend. Everything it needs from the outside world comes through the
//! narrow traits in this module:
//! - Outbound state and chat-style notices go through [`NotificationSink`]
//! - Client lookup and packet delivery go through [`ConnectionProvider`]
//! - Ban escalation goes through [`AdminAction`]
//! - Team and map shape are read from [`TeamRoster`] and [`MapInfo`]
//!
//! All of these are object-safe and consumed as `Arc<dyn ...>` so one
//! backend object can implement several of them at once.

use shared::Packet;
use std::sync::Arc;

/// Outward notification channel of the match state machine.
///
/// Implementations are called synchronously from the game-logic thread on
/// every state mutation that must reach clients; they must queue the work
/// and return quickly rather than block.
pub trait NotificationSink: Send + Sync {
    /// Broadcasts a serialized game-state snapshot to every client.
    fn broadcast_state(&self, snapshot: &[u8]);

    /// Broadcasts a human-readable notice to every client.
    fn broadcast_notice(&self, message: &str);
}

/// Read access to team composition, owned by an external roster manager.
pub trait TeamRoster: Send + Sync {
    /// Number of teams playing the current match.
    fn team_count(&self) -> u32;

    /// Whether enough players are present to begin a match.
    fn has_enough_players(&self) -> bool;
}

/// Read access to the current map layout.
pub trait MapInfo: Send + Sync {
    /// Identifiers of the capturable objectives on the current map.
    fn objective_ids(&self) -> Vec<u32>;
}

/// Client lookup and packet delivery, owned by the connection manager.
pub trait ConnectionProvider: Send + Sync {
    /// Resolves a server-local client id to an opaque external identity
    /// (account id, address string), or None once the client is gone.
    fn client_identity(&self, client_id: u32) -> Option<String>;

    /// Ids of all currently connected clients.
    fn client_ids(&self) -> Vec<u32>;

    /// Queues a packet for delivery to one client.
    fn send(&self, client_id: u32, packet: &Packet);

    /// Queues a packet for delivery to every client.
    fn broadcast(&self, packet: &Packet);
}

/// Administrative escalation sink. Requests are fire-and-forget; the
/// caller neither retries nor learns whether the action succeeded.
pub trait AdminAction: Send + Sync {
    /// Bans the given identity for `duration_secs` seconds.
    fn ban(&self, identity: &str, duration_secs: u32, reason: &str);
}

/// Roster with a fixed team count that reports ready once a minimum
/// number of clients is connected. Enough for symmetric team modes where
/// team assignment itself lives outside the session core.
pub struct FixedRoster {
    teams: u32,
    min_players: usize,
    connections: Arc<dyn ConnectionProvider>,
}

impl FixedRoster {
    pub fn new(teams: u32, min_players: usize, connections: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            teams,
            min_players,
            connections,
        }
    }
}

impl TeamRoster for FixedRoster {
    fn team_count(&self) -> u32 {
        self.teams
    }

    fn has_enough_players(&self) -> bool {
        self.connections.client_ids().len() >= self.min_players
    }
}

/// Map description with a static objective list.
pub struct StaticMap {
    objectives: Vec<u32>,
}

impl StaticMap {
    pub fn new(objectives: Vec<u32>) -> Self {
        Self { objectives }
    }

    /// Map with objectives numbered 1..=count.
    pub fn with_objective_count(count: u32) -> Self {
        Self::new((1..=count).collect())
    }
}

impl MapInfo for StaticMap {
    fn objective_ids(&self) -> Vec<u32> {
        self.objectives.clone()
    }
}
