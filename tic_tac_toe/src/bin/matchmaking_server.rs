//! Runs the tic-tac-toe matchmaking server

use clap::Parser;
use log::info;
use server::matchmaking::MatchmakingServer;
use shared::{TokenSigner, TokenVerifier};
use std::time::Duration;
use tic_tac_toe::{TicTacToeMatchmaker, AUTH_ISSUER, MATCHMAKER_ISSUER};
use tokio::net::TcpListener;

/// Queues authenticated players and issues signed join tokens for the game
/// server once they are paired.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "9091")]
    port: u16,

    /// Shared HS256 secret for login and join tokens
    #[clap(short, long, default_value = "secret")]
    secret: String,

    /// Matchmaking period in milliseconds
    #[clap(short, long, default_value = "100")]
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

    info!("Starting matchmaking server on {}", addr);
    info!("Match period: {:?}", tick);

    let verifier = TokenVerifier::new(&args.secret, &[AUTH_ISSUER]);
    let signer = TokenSigner::new(&args.secret, MATCHMAKER_ISSUER);
    let server = MatchmakingServer::new(TicTacToeMatchmaker::new(), verifier, signer, tick);

    let listener = TcpListener::bind(&addr).await?;
    server.run(listener).await
}
