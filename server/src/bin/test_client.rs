use bincode::{deserialize, serialize};
use rand::Rng;
use server::game::deserialize_game_state;
use shared::{protocol_version, tags, ByteReader, ByteWriter, Packet};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

// Get current timestamp in milliseconds
fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Server clock as last learned from a sync exchange, advanced by the
/// wall time elapsed since it was learned. 0 until the first exchange.
fn estimated_server_time(learned: &Option<(u64, Instant)>) -> u64 {
    match learned {
        Some((server_ms, at)) => server_ms + at.elapsed().as_millis() as u64,
        None => 0,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Server address
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse::<SocketAddr>()?;

    // Join with our protocol version
    let mut join_payload = ByteWriter::with_capacity(8);
    join_payload.put_u64(protocol_version());
    let join_packet = Packet::new(tags::JOIN, join_payload.into_vec());

    println!("Sending join request to {}", server_addr);
    socket.send_to(&serialize(&join_packet)?, server_addr).await?;

    // Buffer for receiving data
    let mut buf = [0u8; 2048];

    let mut rng = rand::thread_rng();
    let mut next_probe_id: u32 = 1;
    let mut probe_sent_at: Option<(u32, Instant)> = None;
    let mut learned_server_time: Option<(u64, Instant)> = None;

    // Probe the server for a while, answering whatever it sends back
    for i in 0..15 {
        // Send our own clock probe every few iterations
        if i % 5 == 0 {
            let mut probe = ByteWriter::with_capacity(4);
            probe.put_u32(next_probe_id);
            let packet = Packet::new(tags::TIME_SYNC_REQUEST, probe.into_vec());
            socket.send_to(&serialize(&packet)?, server_addr).await?;
            probe_sent_at = Some((next_probe_id, Instant::now()));
            println!("Sent clock probe {}", next_probe_id);
            next_probe_id = next_probe_id.wrapping_add(1);
        }

        // Some movement noise so the traffic looks like a real client
        let mut movement = ByteWriter::with_capacity(8);
        movement.put_f32(rng.gen_range(-1.0..1.0));
        movement.put_f32(rng.gen_range(-1.0..1.0));
        let packet = Packet::new(tags::MOVE, movement.into_vec());
        socket.send_to(&serialize(&packet)?, server_addr).await?;

        // Drain whatever the server sent us this iteration
        while let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await
        {
            let packet = match deserialize::<Packet>(&buf[0..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    println!("Failed to deserialize packet: {}", e);
                    continue;
                }
            };

            match packet.tag.as_str() {
                tags::TIME_SYNC_REQUEST => {
                    // The server is probing us; echo its request id with
                    // our clock and our estimate of the server clock
                    let mut reader = ByteReader::new(&packet.payload);
                    if let Some(request_id) = reader.read_u32() {
                        let mut reply = ByteWriter::with_capacity(20);
                        reply.put_u32(request_id);
                        reply.put_u64(get_timestamp());
                        reply.put_u64(estimated_server_time(&learned_server_time));
                        let response = Packet::new(tags::TIME_SYNC_RESPONSE, reply.into_vec());
                        socket.send_to(&serialize(&response)?, server_addr).await?;
                        println!("Answered server clock probe {}", request_id);
                    }
                }
                tags::TIME_SYNC_RESPONSE => {
                    // Answer to one of our own probes: [request_id][server_time]
                    let mut reader = ByteReader::new(&packet.payload);
                    if let (Some(request_id), Some(server_ms)) =
                        (reader.read_u32(), reader.read_u64())
                    {
                        match probe_sent_at {
                            Some((expected, sent)) if expected == request_id => {
                                let rtt = sent.elapsed().as_millis();
                                learned_server_time = Some((server_ms, Instant::now()));
                                println!(
                                    "Learned server time {} (probe {} rtt {} ms)",
                                    server_ms, request_id, rtt
                                );
                            }
                            _ => println!("Unexpected clock answer {}", request_id),
                        }
                    }
                }
                tags::GAME_STATE => {
                    let state = deserialize_game_state(&packet.payload);
                    println!(
                        "Game state - phase: {}, round: {}, {} teams, {} objectives",
                        state.phase.name(),
                        state.current_round,
                        state.teams.len(),
                        state.objectives.len()
                    );
                    for team in &state.teams {
                        println!(
                            "  Team {}: score={} kills={} deaths={} captures={}",
                            team.team_id, team.score, team.kills, team.deaths,
                            team.objectives_captured
                        );
                    }
                    for objective in &state.objectives {
                        println!(
                            "  Objective {}: team={} progress={:.2} neutral={}",
                            objective.objective_id,
                            objective.controlling_team,
                            objective.capture_progress,
                            objective.is_neutral
                        );
                    }
                }
                tags::NOTICE => {
                    println!("Notice: {}", packet.payload_text().unwrap_or("<binary>"));
                }
                other => println!("Received {} ({} bytes)", other, packet.payload.len()),
            }
        }

        sleep(Duration::from_millis(300)).await;
    }

    // Ask for a final snapshot before leaving
    let request = Packet::empty(tags::GAME_STATE);
    socket.send_to(&serialize(&request)?, server_addr).await?;
    if let Ok(Ok((len, _))) = timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await
    {
        if let Ok(packet) = deserialize::<Packet>(&buf[0..len]) {
            if packet.tag == tags::GAME_STATE {
                let state = deserialize_game_state(&packet.payload);
                println!(
                    "Final state - phase: {}, round: {}",
                    state.phase.name(),
                    state.current_round
                );
            }
        }
    }

    // Send leave when done
    let leave_packet = Packet::empty(tags::LEAVE);
    println!("Sending leave request");
    socket.send_to(&serialize(&leave_packet)?, server_addr).await?;

    println!("Test client finished");
    Ok(())
}
