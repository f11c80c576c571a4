//! State transition contract between envelopes and games
//!
//! The board simulation (piece shapes, rotation, line clearing) lives outside
//! this workspace. [`LedgerReducer`] covers what server and client both need
//! to agree on: seating, ordering by action id, readiness and acceleration.

use crate::{
    ActionEnvelope, ActionId, Game, GameAction, GameId, Player, PlayerStatus, UserId, MAX_PLAYERS,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("player {user_id} is not part of game {game_id}")]
    UnknownPlayer { game_id: GameId, user_id: UserId },
    #[error("action {received} is not newer than last applied action {last}")]
    StaleAction { last: ActionId, received: ActionId },
    #[error("player {user_id} already joined game {game_id}")]
    AlreadyJoined { game_id: GameId, user_id: UserId },
    #[error("game {game_id} is full")]
    GameFull { game_id: GameId },
    #[error("game {game_id} is not running")]
    NotPlaying { game_id: GameId },
    #[error("envelope addressed to {received} applied to game {expected}")]
    GameMismatch { expected: GameId, received: GameId },
}

/// Pure `(previous game, envelope) -> next game` transition.
pub trait GameReducer: Send + Sync {
    fn reduce(&self, game: &Game, envelope: &ActionEnvelope) -> Result<Game, TransitionError>;
}

impl<F> GameReducer for F
where
    F: Fn(&Game, &ActionEnvelope) -> Result<Game, TransitionError> + Send + Sync,
{
    fn reduce(&self, game: &Game, envelope: &ActionEnvelope) -> Result<Game, TransitionError> {
        self(game, envelope)
    }
}

/// True when the game has players and every one of them is ready.
pub fn all_players_ready(game: &Game) -> bool {
    !game.players.is_empty()
        && game
            .players
            .iter()
            .all(|p| p.status == PlayerStatus::Ready)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerReducer;

impl GameReducer for LedgerReducer {
    fn reduce(&self, game: &Game, envelope: &ActionEnvelope) -> Result<Game, TransitionError> {
        if envelope.game_id != game.id {
            return Err(TransitionError::GameMismatch {
                expected: game.id.clone(),
                received: envelope.game_id.clone(),
            });
        }

        let mut next = game.clone();

        if let GameAction::JoinGame { user } = &envelope.action {
            if next.player(&user.id).is_some() {
                return Err(TransitionError::AlreadyJoined {
                    game_id: game.id.clone(),
                    user_id: user.id.clone(),
                });
            }
            if next.players.len() >= MAX_PLAYERS {
                return Err(TransitionError::GameFull {
                    game_id: game.id.clone(),
                });
            }
            let mut player = Player::blank(user.clone());
            player.last_action_id = envelope.action_id;
            next.players.push(player);
            return Ok(next);
        }

        let playing = all_players_ready(&next);
        let player = next
            .player_mut(&envelope.user_id)
            .ok_or_else(|| TransitionError::UnknownPlayer {
                game_id: game.id.clone(),
                user_id: envelope.user_id.clone(),
            })?;

        if envelope.action_id <= player.last_action_id {
            return Err(TransitionError::StaleAction {
                last: player.last_action_id,
                received: envelope.action_id,
            });
        }
        player.last_action_id = envelope.action_id;

        match &envelope.action {
            GameAction::PlayerReady => {
                // Readying up after a finished round starts a new turn
                if matches!(player.status, PlayerStatus::Won | PlayerStatus::Lost) {
                    player.score = 0;
                    player.lines = 0;
                    player.drops = 0;
                    player.drop_acceleration = false;
                }
                player.status = PlayerStatus::Ready;
            }
            GameAction::PlayerPause => {
                player.status = PlayerStatus::Paused;
            }
            GameAction::Drop { rows } => {
                if !playing {
                    return Err(TransitionError::NotPlaying {
                        game_id: game.id.clone(),
                    });
                }
                player.drops += u64::from(*rows);
            }
            GameAction::EnableAcceleration => player.drop_acceleration = true,
            GameAction::DisableAcceleration => player.drop_acceleration = false,
            GameAction::MoveLeft
            | GameAction::MoveRight
            | GameAction::Rotate
            | GameAction::AppendPendingBlocks
            | GameAction::Ping { .. } => {}
            // Seated above
            GameAction::JoinGame { .. } => {}
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::User;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: id.to_uppercase(),
        }
    }

    fn envelope(action_id: ActionId, user_id: &str, action: GameAction) -> ActionEnvelope {
        ActionEnvelope {
            action_id,
            game_id: "g1".to_string(),
            user_id: user_id.to_string(),
            action,
        }
    }

    fn two_player_game() -> Game {
        let game = Game::blank("g1".to_string(), user("a"));
        LedgerReducer
            .reduce(
                &game,
                &envelope(10, "b", GameAction::JoinGame { user: user("b") }),
            )
            .unwrap()
    }

    #[test]
    fn test_join_seats_second_player() {
        let game = two_player_game();
        assert_eq!(game.players.len(), 2);
        assert_eq!(game.players[1].user_id(), "b");
        assert_eq!(game.players[1].last_action_id, 10);
    }

    #[test]
    fn test_join_rejects_full_and_duplicate() {
        let game = two_player_game();

        let dup = LedgerReducer.reduce(
            &game,
            &envelope(11, "b", GameAction::JoinGame { user: user("b") }),
        );
        assert!(matches!(dup, Err(TransitionError::AlreadyJoined { .. })));

        let full = LedgerReducer.reduce(
            &game,
            &envelope(12, "c", GameAction::JoinGame { user: user("c") }),
        );
        assert!(matches!(full, Err(TransitionError::GameFull { .. })));
    }

    #[test]
    fn test_unknown_player_rejected() {
        let game = two_player_game();
        let result = LedgerReducer.reduce(&game, &envelope(20, "z", GameAction::MoveLeft));
        assert_eq!(
            result,
            Err(TransitionError::UnknownPlayer {
                game_id: "g1".to_string(),
                user_id: "z".to_string(),
            })
        );
    }

    #[test]
    fn test_stale_action_rejected() {
        let game = two_player_game();
        let game = LedgerReducer
            .reduce(&game, &envelope(50, "a", GameAction::Rotate))
            .unwrap();
        assert_eq!(game.player("a").unwrap().last_action_id, 50);

        let replay = LedgerReducer.reduce(&game, &envelope(50, "a", GameAction::Rotate));
        assert_eq!(
            replay,
            Err(TransitionError::StaleAction {
                last: 50,
                received: 50
            })
        );
    }

    #[test]
    fn test_game_mismatch_rejected() {
        let game = two_player_game();
        let mut env = envelope(30, "a", GameAction::MoveRight);
        env.game_id = "other".to_string();
        assert!(matches!(
            LedgerReducer.reduce(&game, &env),
            Err(TransitionError::GameMismatch { .. })
        ));
    }

    #[test]
    fn test_drop_requires_all_players_ready() {
        let game = two_player_game();
        let game = LedgerReducer
            .reduce(&game, &envelope(20, "a", GameAction::PlayerReady))
            .unwrap();
        assert!(!all_players_ready(&game));

        let early = LedgerReducer.reduce(&game, &envelope(21, "a", GameAction::Drop { rows: 1 }));
        assert!(matches!(early, Err(TransitionError::NotPlaying { .. })));

        let game = LedgerReducer
            .reduce(&game, &envelope(22, "b", GameAction::PlayerReady))
            .unwrap();
        assert!(all_players_ready(&game));

        let game = LedgerReducer
            .reduce(&game, &envelope(23, "a", GameAction::Drop { rows: 3 }))
            .unwrap();
        assert_eq!(game.player("a").unwrap().drops, 3);
    }

    #[test]
    fn test_acceleration_toggle() {
        let game = two_player_game();
        let game = LedgerReducer
            .reduce(&game, &envelope(20, "b", GameAction::EnableAcceleration))
            .unwrap();
        assert!(game.player("b").unwrap().drop_acceleration);

        let game = LedgerReducer
            .reduce(&game, &envelope(21, "b", GameAction::DisableAcceleration))
            .unwrap();
        assert!(!game.player("b").unwrap().drop_acceleration);
    }

    #[test]
    fn test_ready_after_finished_round_resets_counters() {
        let mut game = two_player_game();
        {
            let player = game.player_mut("a").unwrap();
            player.status = PlayerStatus::Lost;
            player.lines = 7;
            player.drops = 40;
            player.score = 900;
        }

        let game = LedgerReducer
            .reduce(&game, &envelope(30, "a", GameAction::PlayerReady))
            .unwrap();
        let player = game.player("a").unwrap();
        assert_eq!(player.status, PlayerStatus::Ready);
        assert_eq!(player.drops, 0);
        assert_eq!(player.lines, 0);
        assert_eq!(player.score, 0);
    }

    #[test]
    fn test_pause_leaves_counters() {
        let mut game = two_player_game();
        game.player_mut("a").unwrap().drops = 4;

        let game = LedgerReducer
            .reduce(&game, &envelope(30, "a", GameAction::PlayerPause))
            .unwrap();
        let player = game.player("a").unwrap();
        assert_eq!(player.status, PlayerStatus::Paused);
        assert_eq!(player.drops, 4);
    }

    #[test]
    fn test_closure_reducer() {
        let reject = |game: &Game, _: &ActionEnvelope| -> Result<Game, TransitionError> {
            Err(TransitionError::NotPlaying {
                game_id: game.id.clone(),
            })
        };
        let game = two_player_game();
        assert!(reject
            .reduce(&game, &envelope(99, "a", GameAction::MoveLeft))
            .is_err());
    }
}
