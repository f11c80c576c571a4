//! Turning local player intent into stamped, transmitted envelopes

use crate::error::{ClientError, Result};
use crate::game::ClientGameState;
use log::debug;
use shared::{ActionEnvelope, ActionIdGenerator, Clock, GameAction, Packet, SystemClock};
use tokio::sync::mpsc;

pub struct ActionDispatcher<C: Clock = SystemClock> {
    ids: ActionIdGenerator<C>,
    outbound: mpsc::UnboundedSender<Packet>,
}

impl ActionDispatcher<SystemClock> {
    pub fn new(outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self::with_generator(ActionIdGenerator::new(), outbound)
    }
}

impl<C: Clock> ActionDispatcher<C> {
    pub fn with_generator(ids: ActionIdGenerator<C>, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self { ids, outbound }
    }

    /// Stamps `action` for the current user and game, applies it locally and
    /// queues it for the server
    ///
    /// The user and game are read from `state` at the moment of dispatch, so
    /// an action produced for a game that has since been closed fails here
    /// instead of reaching the wrong game.
    pub fn dispatch(
        &mut self,
        state: &mut ClientGameState,
        action: GameAction,
    ) -> Result<ActionEnvelope> {
        let user_id = state.user().ok_or(ClientError::NotAuthenticated)?.id.clone();
        let game_id = state.game_id().ok_or(ClientError::NoActiveGame)?.clone();

        let envelope = ActionEnvelope {
            action_id: self.ids.generate(),
            game_id,
            user_id,
            action,
        };

        state.apply_local(&envelope)?;

        debug!(
            "Dispatching {} {} for game {}",
            envelope.action.name(),
            envelope.action_id,
            envelope.game_id
        );
        self.outbound
            .send(Packet::GameAction(envelope.clone()))
            .map_err(|_| ClientError::ChannelClosed("outbound"))?;

        Ok(envelope)
    }
}
