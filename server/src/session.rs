//! Connection-to-player bookkeeping shared by both server roles

use crate::transport::ConnectionId;
use shared::PlayerId;
use std::collections::HashMap;

/// Maps live connections to the players they authenticated as.
///
/// A connection enters the table when its login token verifies and leaves on
/// close or when a newer connection of the same player evicts it. Until a
/// connection is bound, its frames are treated as login attempts.
#[derive(Debug, Default)]
pub struct SessionTable {
    connections: HashMap<ConnectionId, PlayerId>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a connection to a player, replacing any previous binding of the
    /// same connection.
    pub fn bind(&mut self, conn: ConnectionId, player: PlayerId) {
        self.connections.insert(conn, player);
    }

    pub fn lookup(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.connections.get(&conn).copied()
    }

    /// Removes the binding for a connection, returning the player it carried.
    pub fn evict(&mut self, conn: ConnectionId) -> Option<PlayerId> {
        self.connections.remove(&conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
