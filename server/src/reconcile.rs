//! Repairing clients whose optimistic state diverged from the server
//!
//! When an envelope fails to reduce, the sender is running ahead on a state
//! the server never accepted. The sender gets one authoritative snapshot per
//! `(game, last accepted action)` pair; everything it sends until the game
//! advances is rejected quietly.

use log::error;
use shared::{ActionEnvelope, ActionId, Game, GameId, Packet, TransitionError, UserId};
use std::collections::HashSet;
use std::sync::Arc;

/// Receives transition failures for out-of-band analysis
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &TransitionError, envelope: &ActionEnvelope);
}

/// Reporter that writes failures to the log
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &TransitionError, envelope: &ActionEnvelope) {
        error!(
            "Rejected {} {} from {} in game {}: {}",
            envelope.action.name(),
            envelope.action_id,
            envelope.user_id,
            envelope.game_id,
            error
        );
    }
}

/// Where the sender stands in the authoritative game
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SenderState {
    /// Last action the server accepted from this player
    Seated(ActionId),
    /// Not a player in the game; keyed per user
    Unseated(UserId),
}

type ResyncKey = (GameId, SenderState);

pub struct ReconciliationHandler {
    sent: HashSet<ResyncKey>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ReconciliationHandler {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            sent: HashSet::new(),
            reporter,
        }
    }

    /// Returns the resync packet for the origin, or `None` if one was
    /// already sent for this game state
    pub fn handle_failure(
        &mut self,
        game: &Game,
        envelope: &ActionEnvelope,
        error: &TransitionError,
    ) -> Option<Packet> {
        let state = match game.player(&envelope.user_id) {
            Some(player) => SenderState::Seated(player.last_action_id),
            None => SenderState::Unseated(envelope.user_id.clone()),
        };
        let key = (game.id.clone(), state);

        if !self.sent.insert(key) {
            return None;
        }

        self.reporter.report(error, envelope);
        Some(Packet::GameSync { game: game.clone() })
    }

    /// Drops every key of a deleted game
    pub fn forget_game(&mut self, game_id: &str) {
        self.sent.retain(|(id, _)| id != game_id);
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
