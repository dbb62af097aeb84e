//! The game server role: authenticates players, binds them to games and
//! relays their moves
//!
//! A single dispatcher task serializes all transport events. The first text
//! frame of every connection must be a login token; once a connection is
//! bound, its frames are routed to the player's game. A separate tick task
//! advances every game at a fixed period and retires the finished ones.

use crate::game::{GameInstance, GameStore};
use crate::session::SessionTable;
use crate::transport::{self, Action, ConnectionId, Transport};
use log::{debug, error, info, trace};
use shared::{GameModule, TokenVerifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::{interval, Instant};

pub struct GameServer<G: GameModule> {
    transport: Transport,
    verifier: TokenVerifier,
    tick_period: Duration,
    sessions: Arc<Mutex<SessionTable>>,
    store: Arc<Mutex<GameStore<G>>>,
    action_tx: UnboundedSender<Action>,
    action_rx: UnboundedReceiver<Action>,
}

impl<G: GameModule> GameServer<G> {
    pub fn new(verifier: TokenVerifier, tick_period: Duration) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            transport: Transport::new(),
            verifier,
            tick_period,
            sessions: Arc::new(Mutex::new(SessionTable::new())),
            store: Arc::new(Mutex::new(GameStore::new())),
            action_tx,
            action_rx,
        }
    }

    /// Runs the accept loop, the tick loop and the dispatcher.
    pub async fn run(mut self, listener: TcpListener) -> crate::Result<()> {
        info!("game server listening on {}", listener.local_addr()?);

        tokio::spawn(transport::run(
            listener,
            self.transport.clone(),
            self.action_tx.clone(),
        ));
        self.spawn_update_loop();
        self.process_actions().await;

        Ok(())
    }

    /// Spawns the task that advances every game at the configured period and
    /// retires finished ones, closing their players' connections.
    fn spawn_update_loop(&self) {
        let store = Arc::clone(&self.store);
        let transport = self.transport.clone();
        let period = self.tick_period;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            let mut last_tick = Instant::now();

            loop {
                ticker.tick().await;
                let now = Instant::now();
                let delta_ms = now.duration_since(last_tick).as_millis() as u64;
                last_tick = now;

                let mut store = store.lock().await;
                Self::update_games(&mut store, &transport, delta_ms).await;
            }
        });
    }

    /// One tick: advance every game, close the connections of the ones that
    /// finished and drop them from the store.
    async fn update_games(store: &mut GameStore<G>, transport: &Transport, delta_ms: u64) {
        for game_id in store.game_ids() {
            let Some(game) = store.game(game_id) else { continue };
            let mut game = game.lock().await;

            if game.game_update(delta_ms) {
                debug!("game {} ended", game_id);
                for id in game.player_list() {
                    if let Some(conn) = game.connection(id) {
                        transport.close(conn, "game ended");
                    }
                }
                drop(game);
                store.remove(game_id);
            }
        }
    }

    /// Drains the action queue; returns if the transport side hangs up.
    async fn process_actions(&mut self) {
        while let Some(action) = self.action_rx.recv().await {
            self.handle_action(action).await;
        }
        info!("action queue closed, game server shutting down");
    }

    async fn handle_action(&mut self, action: Action) {
        match action {
            Action::Open { conn } => {
                trace!("connection {} waiting for login", conn);
            }
            Action::Close { conn } => {
                let bound = self.sessions.lock().await.lookup(conn).is_some();
                if bound {
                    self.player_disconnect(conn).await;
                } else {
                    debug!("connection {} closed without logging in", conn);
                }
            }
            Action::Message { conn, text } => {
                let player = self.sessions.lock().await.lookup(conn);
                match player {
                    None => self.setup_player(conn, &text).await,
                    Some(id) => {
                        debug!("received message from player {}", id);
                        let game = self.store.lock().await.get(id);
                        match game {
                            Some(game) => game.lock().await.process_player_update(id, &text),
                            None => error!("player {} does not have a game", id),
                        }
                    }
                }
            }
        }
    }

    /// Verifies a login token and, on success, binds the connection to its
    /// player. Every failure leaves the connection unbound and unanswered;
    /// the client may retry with another frame.
    async fn setup_player(&self, conn: ConnectionId, token: &str) {
        let login = match self.verifier.verify(token) {
            Ok(login) => login,
            Err(e) => {
                debug!("connection {} sent a token that did not verify: {}", conn, e);
                return;
            }
        };

        let data = G::from_json(&login.game_data);
        if !data.is_valid() {
            debug!("connection {} sent a token with unusable game data", conn);
            return;
        }

        let id = data.creator();
        self.sessions.lock().await.bind(conn, id);
        debug!("assigning connection {} to player {}", conn, id);
        self.player_connect(conn, data).await;
    }

    /// Attaches the connection to the player's game, creating the game from
    /// this player's data if it is the first of its party. A player who is
    /// already connected has the older connection evicted and closed: a
    /// reconnect supersedes it.
    async fn player_connect(&self, conn: ConnectionId, data: G) {
        let creator = data.creator();
        let mut store = self.store.lock().await;

        match store.get(creator) {
            None => {
                let players = data.player_list();
                let game = store.insert(GameInstance::new(self.transport.clone(), data), &players);
                game.lock().await.connect(creator, conn);
                debug!("created game for players {:?}", players);
            }
            Some(game) => {
                let mut game = game.lock().await;
                if game.is_connected(creator) {
                    if let Some(old) = game.connection(creator) {
                        self.sessions.lock().await.evict(old);
                        self.transport.close(old, "player connected again");
                        debug!("terminating redundant connection for player {}", creator);
                    }
                    // run the full transition so the module can resync the
                    // fresh connection
                    game.disconnect(creator);
                }
                game.connect(creator, conn);
            }
        }
    }

    /// Unbinds the connection and tells the player's game they are gone. The
    /// game object itself is retired by the tick loop once it reports done.
    async fn player_disconnect(&self, conn: ConnectionId) {
        let id = match self.sessions.lock().await.evict(conn) {
            Some(id) => id,
            None => return,
        };

        let mut store = self.store.lock().await;
        if let Some(game) = store.get(id) {
            game.lock().await.disconnect(id);
        }
        store.forget_player(id);
        debug!("player {} disconnected", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Outgoing;
    use serde_json::{json, Value};
    use shared::{OutMessage, PlayerId, TokenSigner};
    use std::collections::VecDeque;
    use tokio::sync::mpsc::UnboundedReceiver;

    const SECRET: &str = "dispatch-secret";
    const ISSUER: &str = "test_auth";

    /// Minimal module: valid when it has players; finishes on the first tick
    /// when asked to.
    struct StubGame {
        creator: PlayerId,
        players: Vec<PlayerId>,
        ends_on_tick: bool,
        done: bool,
        outbox: VecDeque<OutMessage>,
    }

    impl GameModule for StubGame {
        fn from_json(data: &Value) -> Self {
            let creator = data["player"].as_u64().unwrap_or(0);
            let players = data["players"]
                .as_array()
                .map(|list| list.iter().filter_map(Value::as_u64).collect())
                .unwrap_or_default();
            Self {
                creator,
                players,
                ends_on_tick: data["ends"].as_bool().unwrap_or(false),
                done: false,
                outbox: VecDeque::new(),
            }
        }

        fn is_valid(&self) -> bool {
            !self.players.is_empty() && self.players.contains(&self.creator)
        }

        fn creator(&self) -> PlayerId {
            self.creator
        }

        fn player_list(&self) -> Vec<PlayerId> {
            self.players.clone()
        }

        fn connect(&mut self, id: PlayerId) {
            self.outbox.push_back(OutMessage::to_player(id, "welcome"));
        }

        fn disconnect(&mut self, _id: PlayerId) {}

        fn player_update(&mut self, id: PlayerId, _msg: &Value) {
            self.outbox.push_back(OutMessage::broadcast(format!("moved:{}", id)));
        }

        fn tick(&mut self, _delta_ms: u64) {
            if self.ends_on_tick {
                self.done = true;
            }
        }

        fn is_done(&self) -> bool {
            self.done
        }

        fn pop_message(&mut self) -> Option<OutMessage> {
            self.outbox.pop_front()
        }
    }

    fn server() -> GameServer<StubGame> {
        let verifier = shared::TokenVerifier::new(SECRET, &[ISSUER]);
        GameServer::new(verifier, Duration::from_millis(500))
    }

    fn login_token(player: PlayerId, players: &[PlayerId]) -> String {
        TokenSigner::new(SECRET, ISSUER)
            .sign(0, &json!({ "player": player, "players": players }))
            .unwrap()
    }

    fn wired_connection(server: &GameServer<StubGame>) -> (ConnectionId, UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = server.transport.next_id();
        server.transport.register(conn, tx);
        (conn, rx)
    }

    async fn login(server: &mut GameServer<StubGame>, conn: ConnectionId, token: String) {
        server
            .handle_action(Action::Message { conn, text: token })
            .await;
    }

    #[tokio::test]
    async fn test_login_binds_connection_and_creates_game() {
        let mut server = server();
        let (conn, mut rx) = wired_connection(&server);

        login(&mut server, conn, login_token(1, &[1, 2])).await;

        assert_eq!(server.sessions.lock().await.lookup(conn), Some(1));
        let store = server.store.lock().await;
        assert_eq!(store.len(), 1);
        assert!(store.contains_player(1));
        assert!(store.contains_player(2));
        drop(store);

        assert_eq!(rx.try_recv().unwrap(), Outgoing::Text("welcome".to_string()));
    }

    #[tokio::test]
    async fn test_bad_token_leaves_connection_unbound() {
        let mut server = server();
        let (conn, mut rx) = wired_connection(&server);

        login(&mut server, conn, "garbage".to_string()).await;

        assert!(server.sessions.lock().await.is_empty());
        assert!(server.store.lock().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_game_data_leaves_connection_unbound() {
        let mut server = server();
        let (conn, _rx) = wired_connection(&server);

        // player 5 is not in its own player list
        login(&mut server, conn, login_token(5, &[1, 2])).await;

        assert!(server.sessions.lock().await.is_empty());
        assert!(server.store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_player_joins_existing_game() {
        let mut server = server();
        let (conn1, _rx1) = wired_connection(&server);
        let (conn2, _rx2) = wired_connection(&server);

        login(&mut server, conn1, login_token(1, &[1, 2])).await;
        login(&mut server, conn2, login_token(2, &[1, 2])).await;

        let store = server.store.lock().await;
        assert_eq!(store.len(), 1);
        let game = store.get(2).unwrap();
        let game = game.lock().await;
        assert!(game.is_connected(1));
        assert!(game.is_connected(2));
    }

    #[tokio::test]
    async fn test_reconnect_evicts_previous_connection() {
        let mut server = server();
        let (conn1, mut rx1) = wired_connection(&server);
        let (conn2, mut rx2) = wired_connection(&server);

        login(&mut server, conn1, login_token(1, &[1, 2])).await;
        assert_eq!(rx1.try_recv().unwrap(), Outgoing::Text("welcome".to_string()));

        login(&mut server, conn2, login_token(1, &[1, 2])).await;

        // old connection unbound and closed, new one bound
        assert_eq!(server.sessions.lock().await.lookup(conn1), None);
        assert_eq!(server.sessions.lock().await.lookup(conn2), Some(1));
        assert_eq!(
            rx1.try_recv().unwrap(),
            Outgoing::Close {
                reason: "player connected again".to_string()
            }
        );
        // the module resynced the fresh connection
        assert_eq!(rx2.try_recv().unwrap(), Outgoing::Text("welcome".to_string()));

        let store = server.store.lock().await;
        let game = store.get(1).unwrap();
        assert_eq!(game.lock().await.connection(1), Some(conn2));
    }

    #[tokio::test]
    async fn test_message_routed_to_game() {
        let mut server = server();
        let (conn1, mut rx1) = wired_connection(&server);
        let (conn2, mut rx2) = wired_connection(&server);

        login(&mut server, conn1, login_token(1, &[1, 2])).await;
        login(&mut server, conn2, login_token(2, &[1, 2])).await;
        let _ = rx1.try_recv();
        let _ = rx2.try_recv();

        server
            .handle_action(Action::Message {
                conn: conn1,
                text: "{}".to_string(),
            })
            .await;

        assert_eq!(rx1.try_recv().unwrap(), Outgoing::Text("moved:1".to_string()));
        assert_eq!(rx2.try_recv().unwrap(), Outgoing::Text("moved:1".to_string()));
    }

    #[tokio::test]
    async fn test_close_unbinds_and_forgets_player() {
        let mut server = server();
        let (conn, _rx) = wired_connection(&server);

        login(&mut server, conn, login_token(1, &[1, 2])).await;
        server.handle_action(Action::Close { conn }).await;

        assert!(server.sessions.lock().await.is_empty());
        let store = server.store.lock().await;
        assert!(!store.contains_player(1));
        // the game persists until the tick loop retires it
        assert_eq!(store.len(), 1);
        assert!(store.contains_player(2));
    }

    #[tokio::test]
    async fn test_close_of_unknown_connection_is_ignored() {
        let mut server = server();
        server.handle_action(Action::Close { conn: 77 }).await;
        assert!(server.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_keeps_running_game() {
        let mut server = server();
        let (conn, _rx) = wired_connection(&server);
        login(&mut server, conn, login_token(1, &[1, 2])).await;

        let mut store = server.store.lock().await;
        GameServer::update_games(&mut store, &server.transport, 500).await;

        assert_eq!(store.len(), 1);
        assert!(store.contains_player(1));
    }

    #[tokio::test]
    async fn test_tick_retires_finished_game() {
        let mut server = server();
        let (conn, mut rx) = wired_connection(&server);

        let token = TokenSigner::new(SECRET, ISSUER)
            .sign(0, &json!({ "player": 1, "players": [1, 2], "ends": true }))
            .unwrap();
        login(&mut server, conn, token).await;
        let _ = rx.try_recv(); // welcome frame

        let mut store = server.store.lock().await;
        GameServer::update_games(&mut store, &server.transport, 500).await;

        assert!(store.is_empty());
        assert!(!store.contains_player(1));
        assert!(!store.contains_player(2));
        drop(store);

        assert_eq!(
            rx.try_recv().unwrap(),
            Outgoing::Close {
                reason: "game ended".to_string()
            }
        );
    }
}
