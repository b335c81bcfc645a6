//! UDP transport layer: client registry, socket tasks and the
//! connection-facing trait implementations

use crate::packet_queue::PacketQueue;
use crate::traits::{AdminAction, ConnectionProvider, NotificationSink};
use crate::utils::{get_timestamp, lock_unpoisoned};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{tags, Packet, PacketMeta, ReceivedPacket};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Clients that stay silent for this long are dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound work for the sender task. Addresses for `Unicast` targets
/// are resolved at transmission time so that packets queued for a
/// client that just left are dropped instead of misdelivered.
#[derive(Debug)]
enum SendCommand {
    Unicast { client_id: u32, packet: Packet },
    Broadcast { packet: Packet },
    Direct { addr: SocketAddr, packet: Packet },
}

#[derive(Debug, PartialEq, Eq)]
enum RegisterOutcome {
    Accepted(u32),
    Full,
    Banned,
}

#[derive(Debug, Clone)]
struct RemoteClient {
    id: u32,
    addr: SocketAddr,
    identity: String,
    last_seen: Instant,
}

/// Address-keyed connection table. Client ids are allocated
/// sequentially and never reused within a server run; identities are
/// derived from the remote address.
struct ClientRegistry {
    clients: HashMap<u32, RemoteClient>,
    banned: HashMap<String, Instant>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientRegistry {
    fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            banned: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    fn register(&mut self, addr: SocketAddr) -> RegisterOutcome {
        let identity = identity_for(addr);
        let now = Instant::now();
        self.banned.retain(|_, until| *until > now);
        if self.banned.contains_key(&identity) {
            return RegisterOutcome::Banned;
        }
        if self.clients.len() >= self.max_clients {
            return RegisterOutcome::Full;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(
            client_id,
            RemoteClient {
                id: client_id,
                addr,
                identity,
                last_seen: now,
            },
        );
        info!("Client {} connected from {}", client_id, addr);
        RegisterOutcome::Accepted(client_id)
    }

    fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .values()
            .find(|c| c.addr == addr)
            .map(|c| c.id)
    }

    fn find_by_identity(&self, identity: &str) -> Option<u32> {
        self.clients
            .values()
            .find(|c| c.identity == identity)
            .map(|c| c.id)
    }

    fn touch(&mut self, client_id: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    fn remove(&mut self, client_id: u32) -> bool {
        if self.clients.remove(&client_id).is_some() {
            info!("Client {} removed", client_id);
            true
        } else {
            false
        }
    }

    fn addr_of(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|c| c.addr)
    }

    fn identity_of(&self, client_id: u32) -> Option<String> {
        self.clients.get(&client_id).map(|c| c.identity.clone())
    }

    fn ids(&self) -> Vec<u32> {
        self.clients.keys().copied().collect()
    }

    fn addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients.values().map(|c| (c.id, c.addr)).collect()
    }

    fn ban_identity(&mut self, identity: &str, duration: Duration) {
        self.banned
            .insert(identity.to_string(), Instant::now() + duration);
    }

    /// Removes and returns every client whose last packet is older
    /// than the timeout.
    fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .clients
            .values()
            .filter(|c| now.duration_since(c.last_seen) >= timeout)
            .map(|c| c.id)
            .collect();
        for client_id in &expired {
            self.clients.remove(client_id);
        }
        expired
    }

    fn len(&self) -> usize {
        self.clients.len()
    }
}

fn identity_for(addr: SocketAddr) -> String {
    format!("udp:{}", addr)
}

/// UDP socket plus the three tasks that service it: a receiver feeding
/// the packet queue, a sender draining the outbound channel, and a
/// timeout sweep. Disconnects of any kind (explicit leave, timeout,
/// ban) surface to the logic thread as a synthesized LEAVE packet in
/// the queue, so the session has a single cleanup path.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    registry: Mutex<ClientRegistry>,
    send_tx: mpsc::UnboundedSender<SendCommand>,
    send_rx: Mutex<Option<mpsc::UnboundedReceiver<SendCommand>>>,
    queue: Arc<PacketQueue<ReceivedPacket>>,
    client_timeout: Duration,
}

impl UdpTransport {
    pub async fn bind(
        addr: &str,
        queue: Arc<PacketQueue<ReceivedPacket>>,
        max_clients: usize,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (send_tx, send_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            socket,
            registry: Mutex::new(ClientRegistry::new(max_clients)),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            queue,
            client_timeout: CLIENT_TIMEOUT,
        }))
    }

    /// Spawns the socket tasks. Call once from within a runtime; a
    /// second call is ignored.
    pub fn start(self: &Arc<Self>) {
        let mut send_rx = match lock_unpoisoned(&self.send_rx).take() {
            Some(rx) => rx,
            None => {
                warn!("Transport tasks already started");
                return;
            }
        };

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            loop {
                match transport.socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => transport.handle_datagram(&buffer[..len], addr),
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(command) = send_rx.recv().await {
                transport.process_send_command(command).await;
            }
        });

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let expired = {
                    let mut registry = lock_unpoisoned(&transport.registry);
                    registry.check_timeouts(transport.client_timeout)
                };
                for client_id in expired {
                    info!("Client {} timed out", client_id);
                    transport.synthesize_leave(client_id);
                }
            }
        });
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    pub fn client_count(&self) -> usize {
        lock_unpoisoned(&self.registry).len()
    }

    /// Decodes one datagram and routes it into the packet queue.
    /// Unknown senders are only admitted through a JOIN packet.
    fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let packet: Packet = match deserialize(data) {
            Ok(packet) => packet,
            Err(_) => {
                warn!("Failed to deserialize packet from {}", addr);
                return;
            }
        };

        let client_id = {
            let mut registry = lock_unpoisoned(&self.registry);
            match registry.find_by_addr(addr) {
                Some(client_id) => {
                    registry.touch(client_id);
                    Some(client_id)
                }
                None if packet.tag == tags::JOIN => match registry.register(addr) {
                    RegisterOutcome::Accepted(client_id) => Some(client_id),
                    RegisterOutcome::Full => {
                        warn!("Rejecting client from {}: server full", addr);
                        self.send_direct(addr, Packet::text(tags::NOTICE, "Server full"));
                        None
                    }
                    RegisterOutcome::Banned => {
                        warn!("Rejecting banned client from {}", addr);
                        self.send_direct(addr, Packet::text(tags::NOTICE, "You are banned from this server"));
                        None
                    }
                },
                None => {
                    debug!("Dropping '{}' from unknown sender {}", packet.tag, addr);
                    None
                }
            }
        };

        if let Some(client_id) = client_id {
            let leaving = packet.tag == tags::LEAVE;
            self.queue.enqueue(ReceivedPacket::new(
                client_id,
                packet,
                PacketMeta::with_addr(get_timestamp(), addr),
            ));
            if leaving {
                lock_unpoisoned(&self.registry).remove(client_id);
            }
        }
    }

    async fn process_send_command(&self, command: SendCommand) {
        match command {
            SendCommand::Unicast { client_id, packet } => {
                let addr = lock_unpoisoned(&self.registry).addr_of(client_id);
                match addr {
                    Some(addr) => {
                        if let Err(e) = Self::transmit(&self.socket, &packet, addr).await {
                            error!("Failed to send to client {}: {}", client_id, e);
                        }
                    }
                    None => debug!("Dropping packet for unknown client {}", client_id),
                }
            }
            SendCommand::Broadcast { packet } => {
                let targets = lock_unpoisoned(&self.registry).addrs();
                for (client_id, addr) in targets {
                    if let Err(e) = Self::transmit(&self.socket, &packet, addr).await {
                        error!("Failed to send to client {}: {}", client_id, e);
                    }
                }
            }
            SendCommand::Direct { addr, packet } => {
                if let Err(e) = Self::transmit(&self.socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        }
    }

    async fn transmit(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_direct(&self, addr: SocketAddr, packet: Packet) {
        if let Err(e) = self.send_tx.send(SendCommand::Direct { addr, packet }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Feeds a LEAVE for the client into the queue so the logic thread
    /// releases its per-client state.
    fn synthesize_leave(&self, client_id: u32) {
        self.queue.enqueue(ReceivedPacket::new(
            client_id,
            Packet::empty(tags::LEAVE),
            PacketMeta::new(get_timestamp()),
        ));
    }
}

impl ConnectionProvider for UdpTransport {
    fn client_identity(&self, client_id: u32) -> Option<String> {
        lock_unpoisoned(&self.registry).identity_of(client_id)
    }

    fn client_ids(&self) -> Vec<u32> {
        lock_unpoisoned(&self.registry).ids()
    }

    fn send(&self, client_id: u32, packet: &Packet) {
        let command = SendCommand::Unicast {
            client_id,
            packet: packet.clone(),
        };
        if let Err(e) = self.send_tx.send(command) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast(&self, packet: &Packet) {
        let command = SendCommand::Broadcast {
            packet: packet.clone(),
        };
        if let Err(e) = self.send_tx.send(command) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }
}

impl AdminAction for UdpTransport {
    fn ban(&self, identity: &str, duration_secs: u32, reason: &str) {
        warn!(
            "Ban requested for {} ({} s): {}",
            identity, duration_secs, reason
        );

        let removed = {
            let mut registry = lock_unpoisoned(&self.registry);
            registry.ban_identity(identity, Duration::from_secs(duration_secs as u64));
            registry.find_by_identity(identity).map(|client_id| {
                let addr = registry.addr_of(client_id);
                registry.remove(client_id);
                (client_id, addr)
            })
        };

        match removed {
            Some((client_id, addr)) => {
                if let Some(addr) = addr {
                    self.send_direct(addr, Packet::text(tags::NOTICE, &format!("Banned: {}", reason)));
                }
                self.synthesize_leave(client_id);
                info!("Client {} ({}) banned", client_id, identity);
            }
            None => debug!("Ban target {} not connected", identity),
        }
    }
}

impl NotificationSink for UdpTransport {
    fn broadcast_state(&self, data: &[u8]) {
        self.broadcast(&Packet::new(tags::GAME_STATE, data.to_vec()));
    }

    fn broadcast_notice(&self, text: &str) {
        self.broadcast(&Packet::text(tags::NOTICE, text));
    }
}
