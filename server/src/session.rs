//! Game session wiring and the single consumer loop
//!
//! Responsibilities:
//! - Drain the packet queue on one logic thread, gate every inbound
//!   packet and dispatch it by tag
//! - Run the per-tick maintenance pass (violation decay, sync-request
//!   eviction, round pacing, match timers)
//! - Send periodic clock-sync probes to every connected client
//!
//! All match mutation happens on the thread that calls `run()`; the
//! network layer only talks to the session through the queue and the
//! collaborator traits.

use crate::anti_cheat::AntiCheatGate;
use crate::clock_sync::ClockSynchronizer;
use crate::config::ServerConfig;
use crate::dispatcher::{PacketDispatcher, PacketHandler};
use crate::game::{GameState, MatchState};
use crate::packet_queue::{DequeueTimeoutError, PacketQueue};
use crate::round::RoundManager;
use crate::traits::{AdminAction, ConnectionProvider, MapInfo, NotificationSink, TeamRoster};
use log::{debug, info, warn};
use shared::{protocol_version, tags, versions_compatible, ByteReader, Packet, ReceivedPacket};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable state shared by all packet handlers. Custom handlers
/// registered by the embedding layer receive `&mut SessionContext` and
/// may use every field directly.
pub struct SessionContext {
    pub game: GameState,
    pub gate: AntiCheatGate,
    pub sync: Arc<ClockSynchronizer>,
    pub connections: Arc<dyn ConnectionProvider>,
    pub sink: Arc<dyn NotificationSink>,
}

impl SessionContext {
    /// Sends a packet to one client. Outbound traffic passes the gate
    /// for accounting; the packet is transmitted either way.
    pub fn send(&self, client_id: u32, packet: &Packet) {
        self.gate.inspect_packet(client_id, packet, false);
        self.connections.send(client_id, packet);
    }
}

/// The server's logic core: one queue consumer that owns the match
/// state and everything that mutates it.
pub struct Session {
    queue: Arc<PacketQueue<ReceivedPacket>>,
    dispatcher: PacketDispatcher<SessionContext>,
    round: RoundManager,
    ctx: SessionContext,
    tick_duration: Duration,
    sync_interval_ticks: u64,
    tick_count: u64,
    last_match_state: MatchState,
}

impl Session {
    /// Wires the queue, gate, synchronizer, match state and round
    /// pacing together and registers the built-in packet handlers.
    pub fn new(
        config: &ServerConfig,
        queue: Arc<PacketQueue<ReceivedPacket>>,
        connections: Arc<dyn ConnectionProvider>,
        admin: Arc<dyn AdminAction>,
        roster: Arc<dyn TeamRoster>,
        map: Arc<dyn MapInfo>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let game = GameState::new(&config.match_config, roster, map, Arc::clone(&sink));
        let gate = AntiCheatGate::new(&config.security, Arc::clone(&connections), admin);
        let sync = Arc::new(ClockSynchronizer::new(config.security.sync_timeout_ms));
        let round = RoundManager::new(&config.match_config, Arc::clone(&sink));

        let mut dispatcher = PacketDispatcher::new();
        Self::register_builtin_handlers(&mut dispatcher);

        Self {
            queue,
            dispatcher,
            round,
            ctx: SessionContext {
                game,
                gate,
                sync,
                connections,
                sink,
            },
            tick_duration: config.tick_duration(),
            sync_interval_ticks: config.sync_interval_ticks,
            tick_count: 0,
            last_match_state: MatchState::NotStarted,
        }
    }

    /// Handle to the inbound queue, for producers and for shutdown.
    pub fn queue(&self) -> Arc<PacketQueue<ReceivedPacket>> {
        Arc::clone(&self.queue)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.ctx
    }

    /// Registers (or replaces) the handler for a packet tag.
    pub fn register_handler(&mut self, tag: impl Into<String>, handler: PacketHandler<SessionContext>) {
        self.dispatcher.register(tag, handler);
    }

    /// Replaces the fallback for tags without a registered handler.
    pub fn set_default_handler(&mut self, handler: PacketHandler<SessionContext>) {
        self.dispatcher.set_default(handler);
    }

    /// Blocks draining the queue until it is shut down. Packets are
    /// processed in arrival order; the maintenance pass runs between
    /// packets at the configured tick rate.
    pub fn run(&mut self) {
        info!(
            "Session loop started ({} ms tick)",
            self.tick_duration.as_millis()
        );
        let mut next_tick = Instant::now() + self.tick_duration;

        loop {
            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                next_tick = now + self.tick_duration;
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            match self.queue.dequeue_timeout(wait) {
                Ok(received) => self.process_packet(received),
                Err(DequeueTimeoutError::TimedOut) => {}
                Err(DequeueTimeoutError::Closed) => {
                    info!("Packet queue closed, session loop exiting");
                    break;
                }
            }
        }
    }

    fn process_packet(&mut self, received: ReceivedPacket) {
        let ReceivedPacket {
            client_id,
            packet,
            meta,
        } = received;
        // Violations are counted and escalate to a ban request; the
        // packet itself still reaches its handler
        self.ctx.gate.inspect_packet(client_id, &packet, true);
        self.dispatcher.handle(&mut self.ctx, client_id, &packet, &meta);
    }

    fn tick(&mut self) {
        self.ctx.gate.update();
        self.ctx.sync.update();

        let state = self.ctx.game.match_state();
        if state == MatchState::InProgress {
            if self.last_match_state == MatchState::NotStarted {
                // A new match began since the last tick: discard the
                // stale pacing deadline. A resume from pause keeps it,
                // so paused time counts against the pacing clock.
                self.round.reset();
            }
            self.round.update(&mut self.ctx.game);
        }
        self.last_match_state = state;
        self.ctx.game.update();

        self.tick_count += 1;
        if self.sync_interval_ticks > 0 && self.tick_count % self.sync_interval_ticks == 0 {
            self.send_sync_probes();
        }
    }

    fn send_sync_probes(&mut self) {
        for client_id in self.ctx.connections.client_ids() {
            let probe = self.ctx.sync.send_request(client_id);
            self.ctx
                .send(client_id, &Packet::new(tags::TIME_SYNC_REQUEST, probe));
        }
    }

    fn register_builtin_handlers(dispatcher: &mut PacketDispatcher<SessionContext>) {
        dispatcher.register(
            tags::TIME_SYNC_REQUEST,
            Box::new(|ctx, client_id, packet, _meta| {
                let reply = ctx.sync.handle_request(&packet.payload);
                if !reply.is_empty() {
                    ctx.send(client_id, &Packet::new(tags::TIME_SYNC_RESPONSE, reply));
                }
            }),
        );

        dispatcher.register(
            tags::TIME_SYNC_RESPONSE,
            Box::new(|ctx, client_id, packet, meta| {
                ctx.sync.handle_response(client_id, meta.addr, &packet.payload);
            }),
        );

        dispatcher.register(
            tags::GAME_STATE,
            Box::new(|ctx, client_id, _packet, _meta| {
                let snapshot = ctx.game.serialize();
                ctx.send(client_id, &Packet::new(tags::GAME_STATE, snapshot));
            }),
        );

        dispatcher.register(
            tags::CHAT,
            Box::new(|ctx, client_id, packet, _meta| match packet.payload_text() {
                Some(text) => {
                    ctx.sink
                        .broadcast_notice(&format!("Client {}: {}", client_id, text));
                }
                None => debug!("Discarding non-text chat from client {}", client_id),
            }),
        );

        dispatcher.register(
            tags::JOIN,
            Box::new(|ctx, client_id, packet, _meta| {
                let remote = ByteReader::new(&packet.payload).read_u64();
                match remote {
                    Some(version) if versions_compatible(protocol_version(), version) => {
                        info!("Client {} joined (protocol {:#x})", client_id, version);
                        ctx.sink
                            .broadcast_notice(&format!("Client {} joined", client_id));
                        ctx.game.try_begin_match();
                    }
                    Some(version) => {
                        warn!(
                            "Client {} protocol {:#x} incompatible with local {:#x}",
                            client_id,
                            version,
                            protocol_version()
                        );
                        ctx.send(
                            client_id,
                            &Packet::text(tags::NOTICE, "Incompatible protocol version"),
                        );
                    }
                    None => {
                        warn!("Client {} joined without a protocol version", client_id);
                        ctx.send(
                            client_id,
                            &Packet::text(tags::NOTICE, "Incompatible protocol version"),
                        );
                    }
                }
            }),
        );

        dispatcher.register(
            tags::LEAVE,
            Box::new(|ctx, client_id, _packet, _meta| {
                ctx.gate.remove_client(client_id);
                ctx.sync.remove_client(client_id);
                info!("Client {} left", client_id);
                ctx.sink
                    .broadcast_notice(&format!("Client {} left", client_id));
            }),
        );

        dispatcher.register(
            tags::PING,
            Box::new(|ctx, client_id, _packet, _meta| {
                ctx.send(client_id, &Packet::empty(tags::PING));
            }),
        );

        dispatcher.register(
            tags::KILL,
            Box::new(|ctx, client_id, packet, _meta| {
                let mut reader = ByteReader::new(&packet.payload);
                match (reader.read_u32(), reader.read_u32()) {
                    (Some(killer_team), Some(victim_team)) => {
                        ctx.game.add_team_kill(killer_team);
                        ctx.game.add_team_death(victim_team);
                    }
                    _ => debug!("Short kill report from client {}", client_id),
                }
            }),
        );

        dispatcher.register(
            tags::OBJECTIVE_PROGRESS,
            Box::new(|ctx, client_id, packet, _meta| {
                let mut reader = ByteReader::new(&packet.payload);
                match (reader.read_u32(), reader.read_u32(), reader.read_f32()) {
                    (Some(objective_id), Some(team), Some(progress)) => {
                        ctx.game.update_objective(objective_id, team, progress);
                    }
                    _ => debug!("Short objective report from client {}", client_id),
                }
            }),
        );
    }
}
