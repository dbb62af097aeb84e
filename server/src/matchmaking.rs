//! The matchmaking server role: pools authenticated sessions and issues
//! signed join tokens
//!
//! Connections log in exactly as on the game server; each accepted login
//! becomes a pending session. A fixed-rate match loop hands the pool to the
//! pluggable matchmaker, signs a join token for every member of each emitted
//! group, sends it and closes the connection. Sessions that disconnect while
//! waiting are removed before they can go stale.

use crate::session::SessionTable;
use crate::transport::{self, Action, ConnectionId, Transport};
use log::{debug, error, info, trace};
use serde_json::json;
use shared::{Matchmaker, PlayerId, SessionData, SessionId, TokenSigner, TokenVerifier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::{interval, Instant};

/// The waiting sessions plus the matchmaker that consumes them, guarded by
/// one lock so the dispatcher and the match loop never race.
struct MatchPool<M: Matchmaker> {
    matchmaker: M,
    session_data: HashMap<SessionId, M::Session>,
    session_conns: HashMap<SessionId, ConnectionId>,
    player_sessions: HashMap<PlayerId, SessionId>,
    next_session_id: SessionId,
}

impl<M: Matchmaker> MatchPool<M> {
    fn new(matchmaker: M) -> Self {
        Self {
            matchmaker,
            session_data: HashMap::new(),
            session_conns: HashMap::new(),
            player_sessions: HashMap::new(),
            next_session_id: 0,
        }
    }

    fn add_session(&mut self, player: PlayerId, conn: ConnectionId, data: M::Session) -> SessionId {
        let session = self.next_session_id;
        self.next_session_id += 1;

        self.session_data.insert(session, data);
        self.session_conns.insert(session, conn);
        self.player_sessions.insert(player, session);
        session
    }

    fn remove_session(&mut self, session: SessionId) {
        self.session_data.remove(&session);
        self.session_conns.remove(&session);
        self.player_sessions.retain(|_, s| *s != session);
    }
}

pub struct MatchmakingServer<M: Matchmaker> {
    transport: Transport,
    verifier: TokenVerifier,
    signer: Arc<TokenSigner>,
    tick_period: Duration,
    sessions: Arc<Mutex<SessionTable>>,
    pool: Arc<Mutex<MatchPool<M>>>,
    action_tx: UnboundedSender<Action>,
    action_rx: UnboundedReceiver<Action>,
}

impl<M: Matchmaker> MatchmakingServer<M> {
    pub fn new(
        matchmaker: M,
        verifier: TokenVerifier,
        signer: TokenSigner,
        tick_period: Duration,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            transport: Transport::new(),
            verifier,
            signer: Arc::new(signer),
            tick_period,
            sessions: Arc::new(Mutex::new(SessionTable::new())),
            pool: Arc::new(Mutex::new(MatchPool::new(matchmaker))),
            action_tx,
            action_rx,
        }
    }

    /// Runs the accept loop, the match loop and the dispatcher.
    pub async fn run(mut self, listener: TcpListener) -> crate::Result<()> {
        info!("matchmaking server listening on {}", listener.local_addr()?);

        tokio::spawn(transport::run(
            listener,
            self.transport.clone(),
            self.action_tx.clone(),
        ));
        self.spawn_match_loop();
        self.process_actions().await;

        Ok(())
    }

    /// Spawns the task that runs the matchmaker at the configured period.
    fn spawn_match_loop(&self) {
        let pool = Arc::clone(&self.pool);
        let sessions = Arc::clone(&self.sessions);
        let transport = self.transport.clone();
        let signer = Arc::clone(&self.signer);
        let period = self.tick_period;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            let mut last_tick = Instant::now();

            loop {
                ticker.tick().await;
                let now = Instant::now();
                let delta_ms = now.duration_since(last_tick).as_millis() as u64;
                last_tick = now;

                let mut pool = pool.lock().await;
                Self::match_tick(&mut pool, &sessions, &transport, &signer, delta_ms).await;
            }
        });
    }

    /// One pass of the matcher: sign and deliver a join token to every member
    /// of every emitted group, close their connections, and forward the
    /// matchmaker's messages to the sessions that keep waiting.
    async fn match_tick(
        pool: &mut MatchPool<M>,
        sessions: &Mutex<SessionTable>,
        transport: &Transport,
        signer: &TokenSigner,
        delta_ms: u64,
    ) {
        if !pool.matchmaker.can_match(&pool.session_data) {
            return;
        }

        let (groups, messages) = pool.matchmaker.make_matches(&pool.session_data, delta_ms);

        for group in groups {
            debug!("matched sessions {:?} into group {}", group.sessions, group.group);

            for &session in &group.sessions {
                let conn = match pool.session_conns.get(&session) {
                    Some(&conn) => conn,
                    None => {
                        error!("matched session {} is no longer waiting", session);
                        continue;
                    }
                };

                // each member gets the group data stamped with their own
                // identity so the game server can tell the players apart
                let mut data = group.data.clone();
                if let Some(object) = data.as_object_mut() {
                    object.insert("player".to_string(), json!(session));
                    object.insert("players".to_string(), json!(group.sessions));
                }

                match signer.sign(group.group, &data) {
                    Ok(token) => {
                        transport.send(conn, &token);
                        transport.close(conn, "matched");
                    }
                    Err(e) => error!("failed to sign join token for session {}: {}", session, e),
                }

                sessions.lock().await.evict(conn);
            }

            for &session in &group.sessions {
                pool.remove_session(session);
            }
        }

        for (session, text) in messages {
            match pool.session_conns.get(&session) {
                Some(&conn) => transport.send(conn, &text),
                None => debug!("waiting message for departed session {}", session),
            }
        }
    }

    /// Drains the action queue; returns if the transport side hangs up.
    async fn process_actions(&mut self) {
        while let Some(action) = self.action_rx.recv().await {
            self.handle_action(action).await;
        }
        info!("action queue closed, matchmaking server shutting down");
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
                        debug!("ignoring message from queued player {}", id);
                    }
                }
            }
        }
    }

    /// Verifies a login token and, on success, queues the player as a pending
    /// session. A player who is already waiting has the older connection
    /// closed and replaced.
    async fn setup_player(&self, conn: ConnectionId, token: &str) {
        let login = match self.verifier.verify(token) {
            Ok(login) => login,
            Err(e) => {
                debug!("connection {} sent a token that did not verify: {}", conn, e);
                return;
            }
        };

        let data = M::Session::from_json(&login.game_data);
        if !data.is_valid() {
            debug!("connection {} sent a token with unusable session data", conn);
            return;
        }

        let player = data.player();
        let mut pool = self.pool.lock().await;

        if let Some(&previous) = pool.player_sessions.get(&player) {
            if let Some(&old) = pool.session_conns.get(&previous) {
                self.sessions.lock().await.evict(old);
                self.transport.close(old, "player connected again");
                debug!("terminating redundant connection for player {}", player);
            }
            pool.remove_session(previous);
        }

        self.sessions.lock().await.bind(conn, player);
        let session = pool.add_session(player, conn, data);
        debug!("player {} queued as session {}", player, session);
    }

    /// Drops the disconnecting player's pending session and lets the
    /// matchmaker notify anyone it had earmarked as their partner.
    async fn player_disconnect(&self, conn: ConnectionId) {
        let player = match self.sessions.lock().await.evict(conn) {
            Some(player) => player,
            None => return,
        };

        let mut pool = self.pool.lock().await;
        let session = match pool.player_sessions.get(&player) {
            Some(&session) => session,
            None => return,
        };

        pool.remove_session(session);
        debug!("session {} cancelled by player {}", session, player);

        let cancel_text = pool.matchmaker.cancel_data().to_string();
        for peer in pool.matchmaker.cancel(session) {
            match pool.session_conns.get(&peer) {
                Some(&peer_conn) => {
                    trace!("notifying connection {} of a cancelled partner", peer_conn);
                    self.transport.send(peer_conn, &cancel_text);
                }
                None => debug!("cancel notification for departed session {}", peer),
            }
        }
    }
}
