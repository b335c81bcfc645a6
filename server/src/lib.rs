//! # Frontline Dedicated Server Library
//!
//! This library provides the authoritative match server for Frontline.
//! It owns the canonical match state (phases, rounds, scores and
//! objectives), ingests client packets over UDP, and broadcasts state
//! snapshots and textual notices to keep every connected client in
//! agreement.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Match State
//! The server runs the definitive version of the match state machine.
//! All scoring, objective-capture and phase decisions are made here;
//! clients only report events and render what the server broadcasts.
//!
//! ### Packet Pipeline
//! Network tasks produce into a FIFO packet queue; a single logic
//! thread drains it, so match mutation is strictly sequential:
//! - Receive and decode datagrams on the socket task
//! - Inspect every packet against the anti-cheat tag whitelist
//! - Dispatch by tag to the registered handler
//!
//! ### Client Protection
//! Handles abusive or broken clients without trusting them:
//! - Tag whitelist with per-client violation counters and decay
//! - Ban escalation through the administrative interface
//! - Periodic clock synchronization to estimate per-client offset/rtt
//!
//! ## Architecture Design
//!
//! ### Single Consumer Thread
//! All match logic runs on one thread that owns the `GameState`. The
//! network side never touches match state directly; even disconnects
//! arrive as synthesized LEAVE packets through the queue. This
//! eliminates race conditions on scores and phase transitions.
//!
//! ### UDP-Based Communication
//! Clients talk to the server over UDP with a tagged-packet envelope.
//! Snapshots are broadcast as a fixed binary layout that clients can
//! decode defensively even when truncated.
//!
//! ### Collaborator Traits
//! The logic core reaches the outside world only through small object
//! traits (connections, admin actions, roster, map, notifications), so
//! every component is testable with in-memory fakes.
//!
//! ## Module Organization
//!
//! ### Packet Queue (`packet_queue`)
//! Bounded-latency handoff between network tasks and the logic thread:
//! - Strict FIFO across producers
//! - Blocking, non-blocking and timed dequeue
//! - Irreversible shutdown that wakes all blocked consumers
//!
//! ### Dispatcher (`dispatcher`)
//! Tag-to-handler routing with an optional default handler and a
//! warn-and-drop path for unhandled tags.
//!
//! ### Anti-Cheat Gate (`anti_cheat`)
//! Tag whitelist enforcement with per-client violation counters,
//! per-tick decay and ban escalation once a threshold is crossed.
//!
//! ### Clock Synchronizer (`clock_sync`)
//! Request/response clock probing that maintains per-client offset and
//! round-trip-time estimates with timeout-based eviction.
//!
//! ### Match State (`game`)
//! The phase state machine, win-condition evaluation, objective
//! captures, score mutation and binary snapshot codec.
//!
//! ### Round Pacing (`round`)
//! Wall-clock deadlines driving preparation/active/post-round cycling
//! through the match state machine's public transitions.
//!
//! ### Session (`session`)
//! Composition root: the queue consumer loop, built-in packet handlers
//! and the per-tick maintenance pass.
//!
//! ### Network (`network`)
//! UDP socket tasks, the client registry with timeout and ban
//! tracking, and the transport-backed implementations of the
//! collaborator traits.
//!
//! Small supporting modules: `config` (server/match/security knobs),
//! `traits` (collaborator interfaces plus simple provided impls) and
//! `utils` (timestamps, lock helpers).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::UdpTransport;
//! use server::packet_queue::PacketQueue;
//! use server::session::Session;
//! use server::traits::{FixedRoster, StaticMap};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let queue = Arc::new(PacketQueue::new());
//!
//!     // The transport feeds received packets into the queue and backs
//!     // the connection, admin and broadcast interfaces
//!     let transport =
//!         UdpTransport::bind(&config.bind_addr(), Arc::clone(&queue), config.max_clients).await?;
//!     transport.start();
//!
//!     let roster = Arc::new(FixedRoster::new(2, 2, Arc::clone(&transport)));
//!     let map = Arc::new(StaticMap::with_objective_count(3));
//!
//!     let mut session = Session::new(
//!         &config,
//!         Arc::clone(&queue),
//!         Arc::clone(&transport),
//!         Arc::clone(&transport),
//!         roster,
//!         map,
//!         Arc::clone(&transport),
//!     );
//!
//!     // The session owns all match logic; run it on its own thread
//!     let logic = std::thread::spawn(move || session.run());
//!
//!     tokio::signal::ctrl_c().await?;
//!     queue.shutdown();
//!     let _ = logic.join();
//!     Ok(())
//! }
//! ```
//!
//! The transport runs internal async tasks alongside the logic thread:
//! - **Receiver**: decodes datagrams and enqueues them with metadata
//! - **Sender**: drains the outbound channel, resolving addresses late
//! - **Timeout Checker**: sweeps silent clients and synthesizes LEAVEs
//!
//! ## Security Considerations
//!
//! ### Tag Whitelisting
//! Every inbound and outbound packet is checked against the configured
//! tag whitelist. Violations never drop the packet; they count toward
//! a per-client threshold that triggers a ban request.
//!
//! ### Identity-Based Bans
//! Bans target a client's transport identity rather than the volatile
//! client id, so a banned peer cannot rejoin for the ban duration by
//! reconnecting.
//!
//! ### State Authority
//! Clients report kills and objective progress but never mutate state
//! directly; all reports pass through the match state machine's
//! validating operations.

pub mod anti_cheat;
pub mod clock_sync;
pub mod config;
pub mod dispatcher;
pub mod game;
pub mod network;
pub mod packet_queue;
pub mod round;
pub mod session;
pub mod traits;
pub mod utils;
