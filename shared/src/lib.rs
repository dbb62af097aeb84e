//! # Shared Game Session Library
//!
//! This module contains the types shared between the session server core and
//! the pluggable game and matchmaking modules. It serves as the contract
//! boundary of the system: the core knows nothing about any particular game
//! beyond what these traits expose.
//!
//! ## Core Components
//!
//! ### Identifiers
//! - **PlayerId**: assigned by the authentication side and carried in login
//!   tokens; unique per player and never reused across sessions.
//! - **SessionId**: assigned while a player waits in the matchmaking pool and
//!   embedded in issued join tokens.
//!
//! ### Module Contracts
//! - **GameModule**: one game's rules, constructed from the `game_data` claim
//!   of a verified login token. The core drives it through connect/disconnect
//!   transitions, per-player updates and fixed-rate ticks, and drains its
//!   outgoing message queue after every call that may produce output.
//! - **Matchmaker** / **SessionData**: the pairing policy for the matchmaking
//!   server, consuming the pool of waiting sessions and emitting match groups.
//!
//! ### Token Facade
//! The `token` module wraps the JWT library behind a small sign/verify API so
//! the rest of the system never touches raw claims handling.

use serde_json::Value;
use std::collections::HashMap;

pub mod token;

pub use token::{Login, TokenError, TokenSigner, TokenVerifier};

/// Identifies one player across the whole system.
pub type PlayerId = u64;

/// Identifies one matchmaking session or matched group.
pub type SessionId = u64;

/// Addressing for a frame produced by a game module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Deliver to every currently connected player of the game.
    Broadcast,
    /// Deliver to a single player, dropped silently if they are disconnected.
    Player(PlayerId),
}

/// A text frame queued by a game module for delivery to its players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutMessage {
    pub recipient: Recipient,
    pub text: String,
}

impl OutMessage {
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Broadcast,
            text: text.into(),
        }
    }

    pub fn to_player(id: PlayerId, text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Player(id),
            text: text.into(),
        }
    }
}

/// Capability interface of one pluggable game.
///
/// A module is built from the `game_data` claim of a login token. The instance
/// created by the first player of a party becomes the running game; tokens of
/// later players only contribute their `creator` identity. All methods are
/// called under the owning game's lock, so implementations need no internal
/// synchronization and must never block.
pub trait GameModule: Send + 'static {
    /// Builds the module from the opaque JSON carried by a login token.
    ///
    /// Construction itself cannot fail; unusable data is reported through
    /// `is_valid` so the server can reject the login without replying.
    fn from_json(data: &Value) -> Self
    where
        Self: Sized;

    /// True iff the construction JSON was acceptable.
    fn is_valid(&self) -> bool;

    /// The player this token belongs to.
    fn creator(&self) -> PlayerId;

    /// Every player expected to participate in the game.
    fn player_list(&self) -> Vec<PlayerId>;

    /// Marks the player present. Idempotent.
    fn connect(&mut self, id: PlayerId);

    /// Marks the player absent. Idempotent.
    fn disconnect(&mut self, id: PlayerId);

    /// Processes one move from a client. Invalid moves are dropped silently.
    fn player_update(&mut self, id: PlayerId, msg: &Value);

    /// Advances simulated time by `delta_ms` milliseconds.
    fn tick(&mut self, delta_ms: u64);

    /// True iff the game has terminated and can be retired.
    fn is_done(&self) -> bool;

    /// Pops the next queued outgoing frame, if any.
    fn pop_message(&mut self) -> Option<OutMessage>;
}

/// Per-session payload of the matchmaking pool, built from the `game_data`
/// claim of a login token.
pub trait SessionData: Send + 'static {
    fn from_json(data: &Value) -> Self
    where
        Self: Sized;

    /// True iff the construction JSON was acceptable.
    fn is_valid(&self) -> bool;

    /// The player queueing with this session.
    fn player(&self) -> PlayerId;
}

/// One match produced by a matchmaker: the sessions it consumes, the group id
/// to embed in the join tokens, and the game data the game server will build
/// its module from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchGroup {
    pub sessions: Vec<SessionId>,
    pub group: SessionId,
    pub data: Value,
}

/// Capability interface of the matchmaking policy.
pub trait Matchmaker: Send + 'static {
    type Session: SessionData;

    /// Cheap check invoked every tick; true if at least one match could be
    /// produced from the waiting sessions.
    fn can_match(&self, sessions: &HashMap<SessionId, Self::Session>) -> bool;

    /// Produces zero or more match groups plus out-of-band text frames for
    /// sessions that keep waiting.
    fn make_matches(
        &mut self,
        sessions: &HashMap<SessionId, Self::Session>,
        delta_ms: u64,
    ) -> (Vec<MatchGroup>, Vec<(SessionId, String)>);

    /// Called when a waiting session disconnects; returns the sessions that
    /// should be notified with `cancel_data`.
    fn cancel(&mut self, session: SessionId) -> Vec<SessionId>;

    /// Payload sent to a session whose partner cancelled.
    fn cancel_data(&self) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_message_constructors() {
        let broadcast = OutMessage::broadcast("hello");
        assert_eq!(broadcast.recipient, Recipient::Broadcast);
        assert_eq!(broadcast.text, "hello");

        let targeted = OutMessage::to_player(7, "hi");
        assert_eq!(targeted.recipient, Recipient::Player(7));
        assert_eq!(targeted.text, "hi");
    }
}
