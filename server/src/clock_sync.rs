//! Per-client clock-offset and round-trip-time estimation
//!
//! The server periodically probes each client with a request id, the
//! client answers with its own send time, and the response handler
//! combines both with the server-side receive time into an offset and
//! rtt estimate. Requests that never get an answer are evicted by the
//! periodic sweep so the outstanding maps cannot grow without bound.
//!
//! Wire payloads, all little-endian:
//! - probe:            `[request_id: u32]`
//! - stateless echo:   `[request_id: u32][server_time_ms: u64]`
//! - response:         `[request_id: u32][client_send_ms: u64][server_recv_ms: u64]`

use crate::utils::{get_timestamp, lock_unpoisoned};
use log::debug;
use shared::{ByteReader, ByteWriter};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

/// Invoked after each successful measurement with
/// `(client_id, offset_ms, rtt_ms)`. Runs synchronously on the thread
/// that processed the response, after internal locks are released; it
/// must not block.
pub type SyncCallback = Box<dyn Fn(u32, i64, i64) + Send + Sync>;

#[derive(Debug)]
struct ClientClock {
    next_request_id: u32,
    /// Outstanding request ids mapped to their send timestamp.
    outstanding: HashMap<u32, u64>,
    last_offset_ms: i64,
    last_rtt_ms: i64,
}

impl ClientClock {
    fn new() -> Self {
        Self {
            next_request_id: 1,
            outstanding: HashMap::new(),
            last_offset_ms: 0,
            last_rtt_ms: -1,
        }
    }
}

/// Thread-safe clock synchronizer; see the module docs for the wire
/// protocol. Safe for concurrent calls from the packet path and the
/// maintenance path.
pub struct ClockSynchronizer {
    clocks: Mutex<HashMap<u32, ClientClock>>,
    timeout_ms: u64,
    callback: Option<SyncCallback>,
}

impl ClockSynchronizer {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            clocks: Mutex::new(HashMap::new()),
            timeout_ms,
            callback: None,
        }
    }

    /// Synchronizer that reports each measurement to a single
    /// subscriber, set once at construction.
    pub fn with_callback(timeout_ms: u64, callback: SyncCallback) -> Self {
        Self {
            clocks: Mutex::new(HashMap::new()),
            timeout_ms,
            callback: Some(callback),
        }
    }

    /// Allocates the next request id for the client, records the send
    /// timestamp and returns the probe payload to transmit.
    pub fn send_request(&self, client_id: u32) -> Vec<u8> {
        self.send_request_at(client_id, get_timestamp())
    }

    pub(crate) fn send_request_at(&self, client_id: u32, now_ms: u64) -> Vec<u8> {
        let mut clocks = lock_unpoisoned(&self.clocks);
        let clock = clocks.entry(client_id).or_insert_with(ClientClock::new);

        let request_id = clock.next_request_id;
        clock.next_request_id = clock.next_request_id.wrapping_add(1);
        clock.outstanding.insert(request_id, now_ms);

        let mut writer = ByteWriter::with_capacity(4);
        writer.put_u32(request_id);
        writer.into_vec()
    }

    /// Answers a peer's own sync probe with a stateless
    /// echo-with-timestamp. Returns an empty payload for short input;
    /// callers drop empty replies.
    pub fn handle_request(&self, payload: &[u8]) -> Vec<u8> {
        self.handle_request_at(payload, get_timestamp())
    }

    pub(crate) fn handle_request_at(&self, payload: &[u8], now_ms: u64) -> Vec<u8> {
        let mut reader = ByteReader::new(payload);
        let request_id = match reader.read_u32() {
            Some(id) => id,
            None => {
                debug!("Ignoring short sync request ({} bytes)", payload.len());
                return Vec::new();
            }
        };

        let mut writer = ByteWriter::with_capacity(12);
        writer.put_u32(request_id);
        writer.put_u64(now_ms);
        writer.into_vec()
    }

    /// Consumes a client's answer to one of our probes and stores the
    /// resulting offset and rtt. Unknown, duplicate and expired request
    /// ids are silently ignored, as are truncated payloads.
    pub fn handle_response(&self, client_id: u32, addr: Option<SocketAddr>, payload: &[u8]) {
        self.handle_response_at(client_id, addr, payload, get_timestamp())
    }

    pub(crate) fn handle_response_at(
        &self,
        client_id: u32,
        addr: Option<SocketAddr>,
        payload: &[u8],
        now_ms: u64,
    ) {
        let (request_id, client_send_ms, server_recv_ms) = match Self::read_response(payload) {
            Some(fields) => fields,
            None => {
                debug!(
                    "Ignoring short sync response from client {} ({} bytes)",
                    client_id,
                    payload.len()
                );
                return;
            }
        };

        let (offset_ms, rtt_ms) = {
            let mut clocks = lock_unpoisoned(&self.clocks);
            let clock = match clocks.get_mut(&client_id) {
                Some(clock) => clock,
                None => {
                    debug!("Sync response from untracked client {}", client_id);
                    return;
                }
            };
            let send_ms = match clock.outstanding.remove(&request_id) {
                Some(send_ms) => send_ms,
                None => {
                    debug!(
                        "Ignoring duplicate or expired sync response {} from client {}",
                        request_id, client_id
                    );
                    return;
                }
            };

            let rtt = now_ms.saturating_sub(send_ms) as i64;
            let offset = server_recv_ms as i64 + rtt / 2 - client_send_ms as i64;
            clock.last_offset_ms = offset;
            clock.last_rtt_ms = rtt;
            (offset, rtt)
        };

        debug!(
            "Clock sync for client {} ({:?}): offset {} ms, rtt {} ms",
            client_id, addr, offset_ms, rtt_ms
        );

        // The lock is released before notifying; a callback may call
        // back into the synchronizer
        if let Some(callback) = &self.callback {
            callback(client_id, offset_ms, rtt_ms);
        }
    }

    /// Evicts outstanding requests older than the configured timeout.
    /// Callers invoke this once per maintenance tick.
    pub fn update(&self) {
        self.update_at(get_timestamp())
    }

    pub(crate) fn update_at(&self, now_ms: u64) {
        let mut clocks = lock_unpoisoned(&self.clocks);
        for (client_id, clock) in clocks.iter_mut() {
            let before = clock.outstanding.len();
            clock
                .outstanding
                .retain(|_, send_ms| now_ms.saturating_sub(*send_ms) <= self.timeout_ms);
            let evicted = before - clock.outstanding.len();
            if evicted > 0 {
                debug!(
                    "Evicted {} stale sync request(s) for client {}",
                    evicted, client_id
                );
            }
        }
    }

    /// Latest clock offset for the client in milliseconds, 0 when no
    /// measurement exists yet.
    pub fn offset_ms(&self, client_id: u32) -> i64 {
        lock_unpoisoned(&self.clocks)
            .get(&client_id)
            .map(|clock| clock.last_offset_ms)
            .unwrap_or(0)
    }

    /// Latest round-trip time for the client in milliseconds, -1 when
    /// no measurement exists yet.
    pub fn rtt_ms(&self, client_id: u32) -> i64 {
        lock_unpoisoned(&self.clocks)
            .get(&client_id)
            .map(|clock| clock.last_rtt_ms)
            .unwrap_or(-1)
    }

    /// Drops all state for a disconnected client.
    pub fn remove_client(&self, client_id: u32) {
        lock_unpoisoned(&self.clocks).remove(&client_id);
    }

    /// Number of clients with sync state, for diagnostics.
    pub fn tracked_clients(&self) -> usize {
        lock_unpoisoned(&self.clocks).len()
    }

    fn read_response(payload: &[u8]) -> Option<(u32, u64, u64)> {
        let mut reader = ByteReader::new(payload);
        Some((reader.read_u32()?, reader.read_u64()?, reader.read_u64()?))
    }
}
