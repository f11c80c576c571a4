use crate::error::{ClientError, Result};
use log::{debug, warn};
use shared::{
    all_players_ready, ActionEnvelope, Game, GameId, GameReducer, LedgerReducer, User,
    DROP_FRAMES_ACCELERATED,
};
use std::collections::VecDeque;

/// Local envelopes kept for divergence reporting
pub const ACTION_HISTORY_LIMIT: usize = 256;

/// The client's view of the current user and game
///
/// Local actions are applied optimistically before the server sees them.
/// Remote actions arrive already accepted by the server. A resync replaces
/// the game wholesale and throws away whatever local history it contradicts.
pub struct ClientGameState {
    user: Option<User>,
    game: Option<Game>,
    action_history: VecDeque<ActionEnvelope>,
    reducer: LedgerReducer,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            user: None,
            game: None,
            action_history: VecDeque::new(),
            reducer: LedgerReducer,
        }
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn load_game(&mut self, game: Game) {
        self.action_history.clear();
        self.game = Some(game);
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub fn game_id(&self) -> Option<&GameId> {
        self.game.as_ref().map(|g| &g.id)
    }

    pub fn close_game(&mut self) -> Option<Game> {
        self.action_history.clear();
        self.game.take()
    }

    /// Closes the current game if it is `game_id`
    pub fn remove_game(&mut self, game_id: &str) -> bool {
        if self.game_id().is_some_and(|id| id == game_id) {
            self.close_game();
            true
        } else {
            false
        }
    }

    pub fn action_history(&self) -> impl Iterator<Item = &ActionEnvelope> {
        self.action_history.iter()
    }

    /// Optimistically applies an envelope produced by this client
    pub fn apply_local(&mut self, envelope: &ActionEnvelope) -> Result<()> {
        let game = self.game.as_ref().ok_or(ClientError::NoActiveGame)?;

        let next = self.reducer.reduce(game, envelope)?;
        self.game = Some(next);

        self.action_history.push_back(envelope.clone());
        while self.action_history.len() > ACTION_HISTORY_LIMIT {
            self.action_history.pop_front();
        }
        Ok(())
    }

    /// Applies an envelope the server accepted from another player
    ///
    /// Returns false when the envelope is for another game or does not
    /// apply to the local state; the next resync repairs the latter.
    pub fn apply_remote(&mut self, envelope: &ActionEnvelope) -> bool {
        let Some(game) = self.game.as_ref() else {
            return false;
        };
        if game.id != envelope.game_id {
            return false;
        }

        match self.reducer.reduce(game, envelope) {
            Ok(next) => {
                self.game = Some(next);
                true
            }
            Err(e) => {
                debug!("Remote {} did not apply locally: {}", envelope.action.name(), e);
                false
            }
        }
    }

    /// Replaces the game with the server's copy
    ///
    /// Returns how many local actions the server never accepted.
    pub fn apply_sync(&mut self, game: Game) -> usize {
        let accepted_up_to = self
            .user
            .as_ref()
            .and_then(|user| game.player(&user.id))
            .map_or(0, |player| player.last_action_id);

        let discarded = self
            .action_history
            .iter()
            .filter(|envelope| envelope.game_id == game.id && envelope.action_id > accepted_up_to)
            .count();

        if discarded > 0 {
            warn!(
                "Server resync for game {} discarded {} local actions",
                game.id, discarded
            );
        }

        self.action_history.clear();
        self.game = Some(game);
        discarded
    }

    /// Frames per drop for the local player while the round is running
    ///
    /// `None` once any player is not ready, which stops the frame loop.
    pub fn drop_pace(&self) -> Option<f64> {
        let game = self.game.as_ref()?;
        let user = self.user.as_ref()?;
        let player = game.player(&user.id)?;

        if !all_players_ready(game) {
            return None;
        }

        Some(if player.drop_acceleration {
            DROP_FRAMES_ACCELERATED
        } else {
            game.drop_frames
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameAction, PlayerStatus, DROP_FRAMES_DEFAULT};

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
        }
    }

    fn envelope(action_id: u64, user_id: &str, action: GameAction) -> ActionEnvelope {
        ActionEnvelope {
            action_id,
            game_id: "g1".to_string(),
            user_id: user_id.to_string(),
            action,
        }
    }

    fn state_with_game() -> ClientGameState {
        let mut state = ClientGameState::new();
        state.set_user(user("a"));
        state.load_game(Game::blank("g1".to_string(), user("a")));
        state
    }

    #[test]
    fn test_apply_local_records_history() {
        let mut state = state_with_game();
        state
            .apply_local(&envelope(10, "a", GameAction::PlayerReady))
            .unwrap();

        assert_eq!(
            state.game().unwrap().player("a").unwrap().status,
            PlayerStatus::Ready
        );
        assert_eq!(state.action_history().count(), 1);
    }

    #[test]
    fn test_apply_local_without_game() {
        let mut state = ClientGameState::new();
        assert!(matches!(
            state.apply_local(&envelope(1, "a", GameAction::Rotate)),
            Err(ClientError::NoActiveGame)
        ));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = state_with_game();
        for id in 1..=(ACTION_HISTORY_LIMIT as u64 + 10) {
            state.apply_local(&envelope(id, "a", GameAction::Rotate)).unwrap();
        }
        assert_eq!(state.action_history().count(), ACTION_HISTORY_LIMIT);
        assert_eq!(state.action_history().next().unwrap().action_id, 11);
    }

    #[test]
    fn test_apply_remote_join_and_foreign_game() {
        let mut state = state_with_game();
        assert!(state.apply_remote(&envelope(5, "b", GameAction::JoinGame { user: user("b") })));
        assert_eq!(state.game().unwrap().players.len(), 2);
        // Remote actions are not local history
        assert_eq!(state.action_history().count(), 0);

        let mut other = envelope(6, "b", GameAction::Rotate);
        other.game_id = "g2".to_string();
        assert!(!state.apply_remote(&other));
    }

    #[test]
    fn test_apply_sync_discards_unaccepted_actions() {
        let mut state = state_with_game();
        let server_copy = state.game().unwrap().clone();

        state
            .apply_local(&envelope(10, "a", GameAction::PlayerReady))
            .unwrap();
        state.apply_local(&envelope(11, "a", GameAction::Rotate)).unwrap();

        assert_eq!(state.apply_sync(server_copy.clone()), 2);
        assert_eq!(state.game(), Some(&server_copy));
        assert_eq!(state.action_history().count(), 0);
    }

    #[test]
    fn test_apply_sync_keeps_count_of_accepted() {
        let mut state = state_with_game();
        state
            .apply_local(&envelope(10, "a", GameAction::PlayerReady))
            .unwrap();
        state.apply_local(&envelope(11, "a", GameAction::Rotate)).unwrap();

        let mut server_copy = state.game().unwrap().clone();
        server_copy.player_mut("a").unwrap().last_action_id = 10;

        assert_eq!(state.apply_sync(server_copy), 1);
    }

    #[test]
    fn test_drop_pace() {
        let mut state = state_with_game();
        assert_eq!(state.drop_pace(), None);

        state
            .apply_local(&envelope(10, "a", GameAction::PlayerReady))
            .unwrap();
        assert_eq!(state.drop_pace(), Some(DROP_FRAMES_DEFAULT));

        state
            .apply_local(&envelope(11, "a", GameAction::EnableAcceleration))
            .unwrap();
        assert_eq!(state.drop_pace(), Some(DROP_FRAMES_ACCELERATED));

        state
            .apply_local(&envelope(12, "a", GameAction::PlayerPause))
            .unwrap();
        assert_eq!(state.drop_pace(), None);
    }

    #[test]
    fn test_remove_game() {
        let mut state = state_with_game();
        assert!(!state.remove_game("other"));
        assert!(state.remove_game("g1"));
        assert!(state.game().is_none());
    }
}
