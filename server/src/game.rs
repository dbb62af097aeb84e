//! Live game instances and the store that owns them

use crate::transport::{ConnectionId, Transport};
use log::{debug, trace};
use serde_json::Value;
use shared::{GameModule, OutMessage, PlayerId, Recipient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Stable index of a game inside its store.
pub type GameId = u64;

/// Shared handle to one game. The mutex is the per-game lock: every operation
/// runs under it, so no two module callbacks execute concurrently on the same
/// game and a slow game never stalls its neighbours or the tick loop.
pub type SharedGame<G> = Arc<Mutex<GameInstance<G>>>;

/// One running game: the pluggable module plus the connection state of its
/// players.
pub struct GameInstance<G> {
    transport: Transport,
    module: G,
    connections: HashMap<PlayerId, ConnectionId>,
    connected: HashMap<PlayerId, bool>,
}

impl<G: GameModule> GameInstance<G> {
    pub fn new(transport: Transport, module: G) -> Self {
        Self {
            transport,
            module,
            connections: HashMap::new(),
            connected: HashMap::new(),
        }
    }

    /// Records the player's connection. On a fresh connect the module is
    /// notified and any frames it queues (a resync of a running game, say) go
    /// out immediately.
    pub fn connect(&mut self, id: PlayerId, conn: ConnectionId) {
        trace!("connect called for player {}", id);
        self.connections.insert(id, conn);
        if !self.is_connected(id) {
            self.connected.insert(id, true);
            self.module.connect(id);
            self.flush_messages();
        }
    }

    /// Marks the player gone and forwards the transition to the module. The
    /// game itself lives on until the tick loop sees it finish.
    pub fn disconnect(&mut self, id: PlayerId) {
        trace!("disconnect called for player {}", id);
        self.connected.insert(id, false);
        self.module.disconnect(id);
    }

    pub fn is_connected(&self, id: PlayerId) -> bool {
        self.connected.get(&id).copied().unwrap_or(false)
    }

    pub fn connection(&self, id: PlayerId) -> Option<ConnectionId> {
        self.connections.get(&id).copied()
    }

    /// Parses one frame from a player and hands it to the module. A frame
    /// that is not valid JSON is dropped without touching module state.
    pub fn process_player_update(&mut self, id: PlayerId, text: &str) {
        trace!("player_update called for player {}", id);
        let msg: Value = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(_) => {
                debug!("update message from player {} was not valid json", id);
                return;
            }
        };
        self.module.player_update(id, &msg);
        self.flush_messages();
    }

    /// Advances the module by `delta_ms` and reports whether the game
    /// finished. Only the tick loop calls this.
    pub fn game_update(&mut self, delta_ms: u64) -> bool {
        trace!("game update with delta {}ms", delta_ms);
        self.module.tick(delta_ms);
        self.flush_messages();
        self.module.is_done()
    }

    pub fn player_list(&self) -> Vec<PlayerId> {
        self.module.player_list()
    }

    /// Drains the module's output queue. Broadcasts go to every currently
    /// connected player; targeted frames are dropped silently when their
    /// player is disconnected.
    fn flush_messages(&mut self) {
        while let Some(OutMessage { recipient, text }) = self.module.pop_message() {
            match recipient {
                Recipient::Broadcast => {
                    for (&id, &conn) in &self.connections {
                        if self.connected.get(&id).copied().unwrap_or(false) {
                            self.transport.send(conn, &text);
                        }
                    }
                }
                Recipient::Player(id) => match self.connections.get(&id) {
                    Some(&conn) if self.is_connected(id) => self.transport.send(conn, &text),
                    _ => trace!("dropped frame for disconnected player {}", id),
                },
            }
        }
    }
}

/// Owns every live game and the player-to-game reverse index.
///
/// Invariants: every player in the reverse index points at a game in the set,
/// and a player belongs to at most one game at a time.
pub struct GameStore<G> {
    games: HashMap<GameId, SharedGame<G>>,
    player_games: HashMap<PlayerId, GameId>,
    next_game_id: GameId,
}

impl<G: GameModule> GameStore<G> {
    pub fn new() -> Self {
        Self {
            games: HashMap::new(),
            player_games: HashMap::new(),
            next_game_id: 0,
        }
    }

    /// Registers a new game and points every expected player at it.
    pub fn insert(&mut self, game: GameInstance<G>, players: &[PlayerId]) -> SharedGame<G> {
        let id = self.next_game_id;
        self.next_game_id += 1;

        let shared = Arc::new(Mutex::new(game));
        self.games.insert(id, shared.clone());
        for &player in players {
            self.player_games.insert(player, id);
        }
        shared
    }

    /// The game a player belongs to, if any.
    pub fn get(&self, player: PlayerId) -> Option<SharedGame<G>> {
        self.player_games
            .get(&player)
            .and_then(|id| self.games.get(id))
            .cloned()
    }

    pub fn contains_player(&self, player: PlayerId) -> bool {
        self.player_games.contains_key(&player)
    }

    /// Drops a player's reverse-index entry. The game stays in the store
    /// until the tick loop retires it.
    pub fn forget_player(&mut self, player: PlayerId) {
        self.player_games.remove(&player);
    }

    pub fn game_ids(&self) -> Vec<GameId> {
        self.games.keys().copied().collect()
    }

    pub fn game(&self, id: GameId) -> Option<SharedGame<G>> {
        self.games.get(&id).cloned()
    }

    /// Removes a finished game along with its reverse-index entries.
    pub fn remove(&mut self, id: GameId) {
        if self.games.remove(&id).is_some() {
            self.player_games.retain(|_, game| *game != id);
        }
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

impl<G: GameModule> Default for GameStore<G> {
    fn default() -> Self {
        Self::new()
    }
}
