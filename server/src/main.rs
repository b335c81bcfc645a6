use clap::Parser;
use log::{error, info};
use server::config::{MatchConfig, ServerConfig};
use server::network::UdpTransport;
use server::packet_queue::PacketQueue;
use server::session::Session;
use server::traits::{
    AdminAction, ConnectionProvider, FixedRoster, NotificationSink, StaticMap,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Logic ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum simultaneous clients
    #[arg(short = 'c', long, default_value = "32")]
    max_clients: usize,

    /// Number of teams in the match
    #[arg(long, default_value = "2")]
    teams: u32,

    /// Connected clients required before the match can begin
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Number of capturable objectives on the map
    #[arg(long, default_value = "3")]
    objectives: u32,

    /// Rounds played before the map rotates
    #[arg(long, default_value = "5")]
    max_rounds: u32,

    /// Active round length in seconds (0 disables the time limit)
    #[arg(long, default_value = "300")]
    round_secs: u64,

    /// Score that ends a round immediately (0 disables)
    #[arg(long, default_value = "100")]
    score_limit: u32,

    /// Captures that end a round immediately (0 disables)
    #[arg(long, default_value = "5")]
    objective_limit: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ServerConfig::default();
    config.host = args.host;
    config.port = args.port;
    config.tick_rate = args.tick_rate;
    config.max_clients = args.max_clients;
    config.match_config = MatchConfig {
        max_rounds: args.max_rounds,
        round_duration_ms: args.round_secs * 1000,
        score_limit: args.score_limit,
        objective_limit: args.objective_limit,
        ..MatchConfig::default()
    };

    info!("Starting Frontline server on {}", config.bind_addr());
    info!(
        "Match rules: {} teams, {} rounds, {} objectives",
        args.teams, args.max_rounds, args.objectives
    );

    let queue = Arc::new(PacketQueue::new());
    let transport =
        UdpTransport::bind(&config.bind_addr(), Arc::clone(&queue), config.max_clients).await?;
    transport.start();

    let roster = Arc::new(FixedRoster::new(
        args.teams,
        args.min_players,
        Arc::clone(&transport) as Arc<dyn ConnectionProvider>,
    ));
    let map = Arc::new(StaticMap::with_objective_count(args.objectives));

    let mut session = Session::new(
        &config,
        Arc::clone(&queue),
        Arc::clone(&transport) as Arc<dyn ConnectionProvider>,
        Arc::clone(&transport) as Arc<dyn AdminAction>,
        roster,
        map,
        Arc::clone(&transport) as Arc<dyn NotificationSink>,
    );

    // Match logic runs on its own thread; the async runtime keeps the
    // network tasks and the shutdown signal
    let logic = std::thread::spawn(move || session.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping session");
    queue.shutdown();
    if logic.join().is_err() {
        error!("Session thread panicked during shutdown");
    }

    Ok(())
}
