//! Packet policy enforcement with per-client violation tracking
//!
//! Every packet crossing the session boundary, inbound or outbound, is
//! checked against a fixed tag whitelist. Disallowed tags are security
//! signals rather than errors: the packet still flows, but the sending
//! client accrues a violation. Counters decay by one per maintenance
//! tick and a ban is requested from the admin collaborator once the
//! configured threshold is reached. Ban requests are fire-and-forget.

use crate::config::SecurityConfig;
use crate::traits::{AdminAction, ConnectionProvider};
use crate::utils::lock_unpoisoned;
use log::{debug, warn};
use shared::Packet;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Fixed penalty applied when the violation threshold is crossed.
pub const BAN_DURATION_SECS: u32 = 300;

pub struct AntiCheatGate {
    whitelist: HashSet<String>,
    max_violations: u32,
    violations: Mutex<HashMap<u32, u32>>,
    connections: Arc<dyn ConnectionProvider>,
    admin: Arc<dyn AdminAction>,
}

impl AntiCheatGate {
    /// Builds the gate from security configuration. The whitelist and
    /// threshold are immutable for the lifetime of the gate.
    pub fn new(
        security: &SecurityConfig,
        connections: Arc<dyn ConnectionProvider>,
        admin: Arc<dyn AdminAction>,
    ) -> Self {
        Self {
            whitelist: security.tag_whitelist.iter().cloned().collect(),
            max_violations: security.max_violations,
            violations: Mutex::new(HashMap::new()),
            connections,
            admin,
        }
    }

    /// Checks one packet against the whitelist and returns whether it
    /// was allowed. A disallowed tag increments the client's violation
    /// counter and may escalate to a ban request, but the packet itself
    /// is never blocked here; policy observation and enforcement are
    /// decoupled.
    pub fn inspect_packet(&self, client_id: u32, packet: &Packet, incoming: bool) -> bool {
        if self.whitelist.contains(packet.tag.as_str()) {
            return true;
        }

        let count = {
            let mut violations = lock_unpoisoned(&self.violations);
            let count = violations.entry(client_id).or_insert(0);
            *count += 1;
            *count
        };

        let direction = if incoming { "inbound" } else { "outbound" };
        warn!(
            "Disallowed {} packet tag {:?} from client {} (violations {}/{})",
            direction, packet.tag, client_id, count, self.max_violations
        );

        if count >= self.max_violations {
            self.request_ban(client_id, count);
        }
        false
    }

    /// Decays every violation counter by one, floored at zero. Callers
    /// invoke this once per maintenance tick.
    pub fn update(&self) {
        let mut violations = lock_unpoisoned(&self.violations);
        for count in violations.values_mut() {
            *count = count.saturating_sub(1);
        }
        // A counter at zero is behaviorally absent, so reclaim the entry
        violations.retain(|_, count| *count > 0);
    }

    /// Drops tracking state for a disconnected client.
    pub fn remove_client(&self, client_id: u32) {
        lock_unpoisoned(&self.violations).remove(&client_id);
    }

    /// Current violation count, zero for unknown clients.
    pub fn violation_count(&self, client_id: u32) -> u32 {
        lock_unpoisoned(&self.violations)
            .get(&client_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_whitelisted(&self, tag: &str) -> bool {
        self.whitelist.contains(tag)
    }

    fn request_ban(&self, client_id: u32, count: u32) {
        // Resolve the ban target through the connection provider rather
        // than treating the numeric client id as an account identity
        match self.connections.client_identity(client_id) {
            Some(identity) => {
                warn!(
                    "Requesting ban for client {} ({}) after {} violations",
                    client_id, identity, count
                );
                self.admin
                    .ban(&identity, BAN_DURATION_SECS, "Packet policy violations");
            }
            None => {
                debug!(
                    "Client {} disconnected before a ban could be issued",
                    client_id
                );
            }
        }
    }
}
