//! Turn-based tic-tac-toe with chess clocks, pluggable into the game server
//!
//! The first listed player plays X and moves first. Each side has a clock
//! that runs while it is their turn; a flag fall loses the game. The module
//! stays quiet until both players have connected once, then emits per-player
//! state frames on every accepted move, periodic time frames while running,
//! and final state frames when the game ends.

use crate::board::{Board, O_VAL, X_VAL};
use log::{debug, error, trace};
use serde_json::{json, Value};
use shared::{GameModule, OutMessage, PlayerId};
use std::collections::{HashSet, VecDeque};

/// Starting clock for each side, in milliseconds.
const START_TIME_MS: i64 = 100_000;
/// How often time frames go out while the game runs.
const TIME_SYNC_MS: i64 = 1_000;

pub struct TicTacToeGame {
    valid: bool,
    creator: PlayerId,
    players: Vec<PlayerId>,
    joined: HashSet<PlayerId>,
    started: bool,
    game_over: bool,
    x_move: bool,
    state: i32,
    x_time: i64,
    o_time: i64,
    elapsed: i64,
    moves: Vec<Value>,
    board: Board,
    outbox: VecDeque<OutMessage>,
}

impl TicTacToeGame {
    fn x_player(&self) -> PlayerId {
        self.players[0]
    }

    fn o_player(&self) -> PlayerId {
        self.players[1]
    }

    fn push_game_state(&mut self, id: PlayerId) {
        let frame = self.game_state(id).to_string();
        self.outbox.push_back(OutMessage::to_player(id, frame));
    }

    fn push_game_states(&mut self) {
        for player in self.players.clone() {
            self.push_game_state(player);
        }
    }

    fn push_time_states(&mut self) {
        for player in self.players.clone() {
            let frame = self.time_state(player).to_string();
            self.outbox.push_back(OutMessage::to_player(player, frame));
        }
    }

    fn game_state(&self, id: PlayerId) -> Value {
        let is_x = id == self.x_player();
        json!({
            "type": "game",
            "board": self.board.cells().to_vec(),
            "time": if is_x { self.x_time } else { self.o_time },
            "opponent_time": if is_x { self.o_time } else { self.x_time },
            "xmove": self.x_move,
            "moves": self.moves,
            "state": self.board.state() + self.state,
            "done": self.is_done(),
            "your_turn": if is_x { self.x_move } else { !self.x_move },
        })
    }

    fn time_state(&self, id: PlayerId) -> Value {
        let is_x = id == self.x_player();
        json!({
            "type": "time",
            "time": if is_x { self.x_time } else { self.o_time },
            "opponent_time": if is_x { self.o_time } else { self.x_time },
        })
    }
}

impl GameModule for TicTacToeGame {
    fn from_json(data: &Value) -> Self {
        let matched = data
            .get("matched")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let creator = data.get("player").and_then(Value::as_u64).unwrap_or(0);
        let players: Vec<PlayerId> = data
            .get("players")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        let valid = matched
            && players.len() == 2
            && players[0] != players[1]
            && players.contains(&creator);

        Self {
            valid,
            creator,
            players,
            joined: HashSet::new(),
            started: false,
            game_over: false,
            x_move: true,
            state: 0,
            x_time: START_TIME_MS,
            o_time: START_TIME_MS,
            elapsed: 0,
            moves: Vec::new(),
            board: Board::new(),
            outbox: VecDeque::new(),
        }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn creator(&self) -> PlayerId {
        self.creator
    }

    fn player_list(&self) -> Vec<PlayerId> {
        self.players.clone()
    }

    fn connect(&mut self, id: PlayerId) {
        trace!("tic tac toe connect player {}", id);
        self.joined.insert(id);
        if self.started {
            // resync a late or returning player
            self.push_game_state(id);
        }
    }

    fn disconnect(&mut self, id: PlayerId) {
        trace!("tic tac toe disconnect player {}", id);
    }

    fn player_update(&mut self, id: PlayerId, msg: &Value) {
        if !self.started || self.is_done() {
            debug!("player {} sent move outside an active game", id);
            return;
        }

        let mv = msg.get("move").and_then(Value::as_array);
        let (i, j) = match mv.map(|m| (m.first().and_then(Value::as_u64), m.get(1).and_then(Value::as_u64))) {
            Some((Some(i), Some(j))) => (i as usize, j as usize),
            _ => {
                debug!("player {} sent malformed move: {}", id, msg);
                return;
            }
        };

        if id == self.x_player() {
            if !self.x_move {
                debug!("player {} sent move out of turn: {}", id, msg);
                return;
            }
            if !self.board.add_x(i, j) {
                debug!("player {} sent invalid move: {}", id, msg);
                return;
            }
            self.x_move = false;
        } else if id == self.o_player() {
            if self.x_move {
                debug!("player {} sent move out of turn: {}", id, msg);
                return;
            }
            if !self.board.add_o(i, j) {
                debug!("player {} sent invalid move: {}", id, msg);
                return;
            }
            self.x_move = true;
        } else {
            error!("player {} sent a move but isn't in the game", id);
            return;
        }

        self.moves.push(json!([i, j]));
        self.push_game_states();
    }

    fn tick(&mut self, delta_ms: u64) {
        let delta = delta_ms as i64;

        if self.started && !self.game_over {
            if self.x_move {
                self.x_time -= delta;
            } else {
                self.o_time -= delta;
            }

            if self.x_time <= 0 {
                self.x_time = 0;
                self.state = O_VAL;
                self.game_over = true;
            } else if self.o_time <= 0 {
                self.o_time = 0;
                self.state = X_VAL;
                self.game_over = true;
            }

            self.elapsed += delta;
            if self.elapsed >= TIME_SYNC_MS {
                self.push_time_states();
                self.elapsed = 0;
            }

            if self.is_done() {
                self.push_game_states();
            }
        } else if !self.started && self.valid && self.joined.len() > 1 {
            self.started = true;
            self.push_game_states();
        }
    }

    fn is_done(&self) -> bool {
        self.board.is_done() || self.game_over
    }

    fn pop_message(&mut self) -> Option<OutMessage> {
        self.outbox.pop_front()
    }
}
