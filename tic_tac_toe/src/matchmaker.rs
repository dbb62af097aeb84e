//! Pair-anyone matchmaking for tic-tac-toe

use serde_json::{json, Value};
use shared::{MatchGroup, Matchmaker, PlayerId, SessionData, SessionId};
use std::collections::HashMap;

/// Session payload for a queued player. Any authenticated player may queue;
/// the token only has to say who they are.
pub struct TicTacToeSession {
    player: PlayerId,
    valid: bool,
}

impl SessionData for TicTacToeSession {
    fn from_json(data: &Value) -> Self {
        match data.get("player").and_then(Value::as_u64) {
            Some(player) => Self {
                player,
                valid: true,
            },
            None => Self {
                player: 0,
                valid: false,
            },
        }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn player(&self) -> PlayerId {
        self.player
    }
}

/// Pairs any two waiting sessions, oldest first.
#[derive(Default)]
pub struct TicTacToeMatchmaker {
    next_group_id: SessionId,
}

impl TicTacToeMatchmaker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Matchmaker for TicTacToeMatchmaker {
    type Session = TicTacToeSession;

    fn can_match(&self, sessions: &HashMap<SessionId, Self::Session>) -> bool {
        sessions.len() > 1
    }

    fn make_matches(
        &mut self,
        sessions: &HashMap<SessionId, Self::Session>,
        _delta_ms: u64,
    ) -> (Vec<MatchGroup>, Vec<(SessionId, String)>) {
        // session ids are handed out in arrival order
        let mut waiting: Vec<SessionId> = sessions.keys().copied().collect();
        waiting.sort_unstable();

        let mut groups = Vec::new();
        for pair in waiting.chunks(2) {
            if let [a, b] = *pair {
                let group = self.next_group_id;
                self.next_group_id += 1;
                groups.push(MatchGroup {
                    sessions: vec![a, b],
                    group,
                    data: json!({ "matched": true }),
                });
            }
        }

        (groups, Vec::new())
    }

    fn cancel(&mut self, _session: SessionId) -> Vec<SessionId> {
        // pairs form within a single tick, so nobody is ever left waiting on
        // a specific partner
        Vec::new()
    }

    fn cancel_data(&self) -> Value {
        json!({ "matched": false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(players: &[PlayerId]) -> HashMap<SessionId, TicTacToeSession> {
        players
            .iter()
            .enumerate()
            .map(|(session, &player)| {
                (
                    session as SessionId,
                    TicTacToeSession::from_json(&json!({ "player": player })),
                )
            })
            .collect()
    }

    #[test]
    fn test_session_requires_player() {
        assert!(TicTacToeSession::from_json(&json!({ "player": 7 })).is_valid());
        assert!(!TicTacToeSession::from_json(&json!({})).is_valid());
        assert!(!TicTacToeSession::from_json(&json!({ "player": "seven" })).is_valid());
    }

    #[test]
    fn test_cannot_match_single_session() {
        let matchmaker = TicTacToeMatchmaker::new();
        assert!(!matchmaker.can_match(&pool(&[1])));
        assert!(matchmaker.can_match(&pool(&[1, 2])));
    }

    #[test]
    fn test_pairs_in_session_order() {
        let mut matchmaker = TicTacToeMatchmaker::new();
        let (groups, messages) = matchmaker.make_matches(&pool(&[10, 20, 30]), 100);

        assert!(messages.is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].sessions, vec![0, 1]);
        assert_eq!(groups[0].data, json!({ "matched": true }));
    }

    #[test]
    fn test_two_pairs_from_four_sessions() {
        let mut matchmaker = TicTacToeMatchmaker::new();
        let (groups, _) = matchmaker.make_matches(&pool(&[1, 2, 3, 4]), 100);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sessions, vec![0, 1]);
        assert_eq!(groups[1].sessions, vec![2, 3]);
        assert_ne!(groups[0].group, groups[1].group);
    }

    #[test]
    fn test_cancel_data_shape() {
        let mut matchmaker = TicTacToeMatchmaker::new();
        assert_eq!(matchmaker.cancel_data(), json!({ "matched": false }));
        assert!(matchmaker.cancel(0).is_empty());
    }
}
