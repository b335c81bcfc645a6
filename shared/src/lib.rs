use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub const PROTOCOL_MAJOR: u16 = 1;
pub const PROTOCOL_MINOR: u16 = 2;
pub const PROTOCOL_PATCH: u16 = 0;

/// Packet tags understood by the session core.
///
/// Tags are plain strings so external layers can introduce their own
/// without touching this crate; the constants below are the ones the
/// server itself registers handlers or policy for.
pub mod tags {
    pub const MOVE: &str = "MOVE";
    pub const SHOOT: &str = "SHOOT";
    pub const CHAT: &str = "CHAT";
    pub const JOIN: &str = "JOIN";
    pub const LEAVE: &str = "LEAVE";
    pub const PING: &str = "PING";
    pub const KILL: &str = "KILL";
    pub const OBJECTIVE_PROGRESS: &str = "OBJECTIVE_PROGRESS";
    pub const GAME_STATE: &str = "GAME_STATE";
    pub const NOTICE: &str = "NOTICE";
    pub const TIME_SYNC_REQUEST: &str = "TIME_SYNC_REQUEST";
    pub const TIME_SYNC_RESPONSE: &str = "TIME_SYNC_RESPONSE";

    /// Tags allowed through the anti-cheat gate in either direction.
    pub const DEFAULT_WHITELIST: &[&str] = &[
        MOVE,
        SHOOT,
        CHAT,
        JOIN,
        LEAVE,
        PING,
        KILL,
        OBJECTIVE_PROGRESS,
        GAME_STATE,
        NOTICE,
        TIME_SYNC_REQUEST,
        TIME_SYNC_RESPONSE,
    ];
}

/// Returns the local protocol version packed into 48 bits:
/// `(major << 32) | (minor << 16) | patch`.
pub fn protocol_version() -> u64 {
    pack_version(PROTOCOL_MAJOR, PROTOCOL_MINOR, PROTOCOL_PATCH)
}

pub fn pack_version(major: u16, minor: u16, patch: u16) -> u64 {
    ((major as u64) << 32) | ((minor as u64) << 16) | patch as u64
}

pub fn version_parts(version: u64) -> (u16, u16, u16) {
    (
        ((version >> 32) & 0xFFFF) as u16,
        ((version >> 16) & 0xFFFF) as u16,
        (version & 0xFFFF) as u16,
    )
}

/// Two endpoints are compatible when their majors match and the remote
/// minor is at least the local minor. Patch level never matters.
pub fn versions_compatible(local: u64, remote: u64) -> bool {
    let (local_major, local_minor, _) = version_parts(local);
    let (remote_major, remote_minor, _) = version_parts(remote);
    local_major == remote_major && remote_minor >= local_minor
}

/// An opaque tagged message. The tag routes it through the dispatcher;
/// the payload layout is private to whoever registered the handler.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Packet {
    pub tag: String,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    pub fn empty(tag: impl Into<String>) -> Self {
        Self::new(tag, Vec::new())
    }

    pub fn text(tag: impl Into<String>, message: &str) -> Self {
        Self::new(tag, message.as_bytes().to_vec())
    }

    /// Payload interpreted as UTF-8, or None if it is not valid text.
    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Transport-level annotations attached to an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    /// Receipt time in milliseconds since the Unix epoch.
    pub received_at: u64,
    /// Peer address, when the transport knows one.
    pub addr: Option<SocketAddr>,
}

impl PacketMeta {
    pub fn new(received_at: u64) -> Self {
        Self {
            received_at,
            addr: None,
        }
    }

    pub fn with_addr(received_at: u64, addr: SocketAddr) -> Self {
        Self {
            received_at,
            addr: Some(addr),
        }
    }
}

/// A packet as handed from the I/O layer to the game-logic layer.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub client_id: u32,
    pub packet: Packet,
    pub meta: PacketMeta,
}

impl ReceivedPacket {
    pub fn new(client_id: u32, packet: Packet, meta: PacketMeta) -> Self {
        Self {
            client_id,
            packet,
            meta,
        }
    }
}

/// Little-endian byte cursor for the fixed binary layouts (snapshots,
/// clock-sync payloads). Field order and widths are part of the wire
/// contract; never rely on native struct layout instead.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Reading counterpart of [`ByteWriter`]. Every read returns `None`
/// once the buffer is exhausted instead of failing, so truncated input
/// degrades to a partial parse.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let bytes = self.read_bytes(1)?;
        Some(bytes[0])
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        let bytes = self.read_bytes(8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        let bytes = self.read_bytes(8)?;
        Some(i64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_f32(&mut self) -> Option<f32> {
        let bytes = self.read_bytes(4)?;
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }
}
