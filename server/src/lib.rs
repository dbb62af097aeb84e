//! # Game Session Server Core
//!
//! This library provides the shared machinery behind both server roles of the
//! system: the game server that hosts running games and relays moves between
//! authenticated players, and the matchmaking server that pools waiting
//! sessions and issues signed join tokens.
//!
//! ## Architecture Design
//!
//! ### Action Queue and Dispatcher
//! WebSocket connections produce open/close/message events into an unbounded
//! MPSC channel. A single dispatcher task drains the channel, which serializes
//! all session work: login-token verification, player-to-game binding,
//! connection deduplication and message routing. Events from one connection
//! are processed in arrival order; no ordering is guaranteed across
//! connections.
//!
//! ### Tick Loop
//! A dedicated task runs at a fixed period. On the game server it advances
//! every game and retires the finished ones, closing their connections with
//! reason `"game ended"`. On the matchmaking server it invokes the matchmaker
//! over the pending pool and issues signed join tokens to matched sessions.
//!
//! ### Locking
//! State shared between dispatcher and tick tasks sits behind a small set of
//! coarse locks: the session table, the game store (or matchmaking pool), and
//! one mutex per game instance so that a slow game cannot stall the tick or
//! its neighbours. The store lock is taken before the session-table lock when
//! both are needed, and per-game locks are taken last. Sends never block: they
//! push onto per-connection writer queues drained by their own tasks.
//!
//! ## Module Organization
//!
//! - `transport`: WebSocket accept loop, per-connection reader/writer tasks,
//!   and the non-blocking send/close surface used by the rest of the core.
//! - `session`: the connection-to-player table.
//! - `game`: one live game instance plus the store owning all of them.
//! - `game_server`: the dispatcher and tick loop of the game server role.
//! - `matchmaking`: the dispatcher and match loop of the matchmaking role.
//!
//! No error is fatal to a running server: failures are logged and either
//! dropped or answered by closing the offending connection.

pub mod game;
pub mod game_server;
pub mod matchmaking;
pub mod session;
pub mod transport;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
