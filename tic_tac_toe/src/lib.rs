//! # Tic-Tac-Toe Modules
//!
//! The reference plug-ins for the session server: a turn-based tic-tac-toe
//! game with per-side clocks, and a matchmaker that pairs any two waiting
//! players. The `game_server` and `matchmaking_server` binaries wire them
//! into the core.
//!
//! Login tokens for the matchmaking server are issued by `tic_tac_toe_auth`
//! and carry `{"player": <id>}` as their game data. Join tokens for the game
//! server are issued by `tic_tac_toe_matchmaker` and carry
//! `{"matched": true, "player": <session>, "players": [<x>, <o>]}`.

pub mod board;
pub mod game;
pub mod matchmaker;

pub use board::Board;
pub use game::TicTacToeGame;
pub use matchmaker::{TicTacToeMatchmaker, TicTacToeSession};

/// Issuer of login tokens for the matchmaking server.
pub const AUTH_ISSUER: &str = "tic_tac_toe_auth";
/// Issuer of the join tokens the matchmaking server signs.
pub const MATCHMAKER_ISSUER: &str = "tic_tac_toe_matchmaker";
