//! Runs the tic-tac-toe game server

use clap::Parser;
use log::info;
use server::game_server::GameServer;
use shared::TokenVerifier;
use std::time::Duration;
use tic_tac_toe::{TicTacToeGame, AUTH_ISSUER, MATCHMAKER_ISSUER};
use tokio::net::TcpListener;

/// Hosts running tic-tac-toe games and relays moves between their players.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "9090")]
    port: u16,

    /// Shared HS256 secret for login tokens
    #[clap(short, long, default_value = "secret")]
    secret: String,

    /// Game update period in milliseconds
    #[clap(short, long, default_value = "500")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> server::Result<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let tick = Duration::from_millis(args.tick_ms);

    info!("Starting game server on {}", addr);
    info!("Tick period: {:?}", tick);

    let verifier = TokenVerifier::new(&args.secret, &[AUTH_ISSUER, MATCHMAKER_ISSUER]);
    let server = GameServer::<TicTacToeGame>::new(verifier, tick);

    let listener = TcpListener::bind(&addr).await?;
    server.run(listener).await
}
