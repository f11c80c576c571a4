//! Authoritative application of client envelopes
//!
//! [`StateReplicator`] owns the session store and every component that
//! reacts to a game changing: lifecycle timers, resync bookkeeping and
//! statistics. The server loop feeds it one event at a time, which keeps
//! each game's log in the same order its state transitions were applied.

use crate::config::MAX_ACTIVE_GAMES_REPLY;
use crate::error::{Result, SyncError};
use crate::lifecycle::{LifecycleEvent, LifecycleTimeoutManager, TimeoutKind};
use crate::network::GameMessage;
use crate::reconcile::ReconciliationHandler;
use crate::stats::{PendingCounters, StatsAggregator};
use crate::store::SessionStore;
use log::{debug, error, info};
use shared::{
    ActionEnvelope, Game, GameId, GameReducer, LedgerReducer, Packet, RoomId, Session, User,
};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// What happened to one inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// Reduced, logged and broadcast
    Applied,
    /// Game no longer exists; origin told to leave
    GameRemoved,
    /// Rejected; origin sent the authoritative game
    Resynced,
    /// Rejected; origin was already resynced for this state
    Suppressed,
}

pub struct StateReplicator<R: GameReducer = LedgerReducer> {
    store: SessionStore,
    lifecycle: LifecycleTimeoutManager,
    reconciler: ReconciliationHandler,
    stats: StatsAggregator,
    reducer: R,
    outbound: mpsc::UnboundedSender<GameMessage>,
}

impl<R: GameReducer> StateReplicator<R> {
    pub fn new(
        reducer: R,
        store: SessionStore,
        lifecycle: LifecycleTimeoutManager,
        stats: StatsAggregator,
        reconciler: ReconciliationHandler,
        outbound: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            reconciler,
            stats,
            reducer,
            outbound,
        }
    }

    pub fn create_user(&mut self, name: &str) -> (User, Session) {
        let user = self.store.insert_user(name);
        let session = self.store.insert_session(&user.id);
        info!("User {} ({}) authenticated", user.id, user.name);
        (user, session)
    }

    /// Creates a game seated with the session's user and arms its timers
    pub fn create_game(&mut self, session_id: &str) -> Result<Game> {
        let session = self
            .store
            .session(session_id)
            .ok_or_else(|| SyncError::UnknownSession(session_id.to_string()))?;
        let user = self
            .store
            .user(&session.user_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownUser(session.user_id.clone()))?;

        let game = self.store.insert_game(&user);
        self.lifecycle
            .bump(&game.id, self.store.active_games_mut());
        Ok(game)
    }

    pub fn game_snapshot(&self, game_id: &str) -> Option<Game> {
        self.store.game(game_id).cloned()
    }

    /// Games currently on the dashboard, oldest first
    pub fn active_games(&self) -> Vec<Game> {
        self.store
            .active_games()
            .iter()
            .filter_map(|id| self.store.game(id).cloned())
            .take(MAX_ACTIVE_GAMES_REPLY)
            .collect()
    }

    /// Returns false if the game no longer exists
    pub fn handle_keep_alive(&mut self, origin: SocketAddr, game_id: GameId) -> bool {
        if self.store.game(&game_id).is_none() {
            self.send_packet(Packet::GameRemoved { game_id }, origin);
            return false;
        }

        self.lifecycle.bump(&game_id, self.store.active_games_mut());
        self.broadcast_packet(
            Packet::GameKeepAlive { game_id },
            vec![RoomId::Global],
            Some(origin),
        );
        true
    }

    pub fn handle_action(
        &mut self,
        origin: SocketAddr,
        envelope: ActionEnvelope,
    ) -> ReplicationOutcome {
        let Some(prev_game) = self.store.game(&envelope.game_id).cloned() else {
            debug!(
                "{} from {} targets missing game {}",
                envelope.action.name(),
                origin,
                envelope.game_id
            );
            self.send_packet(
                Packet::GameRemoved {
                    game_id: envelope.game_id,
                },
                origin,
            );
            return ReplicationOutcome::GameRemoved;
        };

        let game = match self.reducer.reduce(&prev_game, &envelope) {
            Ok(game) => game,
            Err(e) => {
                return match self.reconciler.handle_failure(&prev_game, &envelope, &e) {
                    Some(sync) => {
                        self.send_packet(sync, origin);
                        ReplicationOutcome::Resynced
                    }
                    None => ReplicationOutcome::Suppressed,
                };
            }
        };

        self.store.replace_game(game.clone());
        self.store.save_game_action(envelope.clone());
        self.lifecycle
            .bump(&envelope.game_id, self.store.active_games_mut());

        self.stats.observe(&envelope, &game, &prev_game);

        let rooms = vec![RoomId::Game(envelope.game_id.clone()), RoomId::Global];
        self.broadcast_packet(Packet::GameAction(envelope), rooms, Some(origin));

        ReplicationOutcome::Applied
    }

    /// Applies a fired lifecycle timer. Returns false for stale events.
    pub fn handle_lifecycle(&mut self, event: &LifecycleEvent) -> bool {
        if !self.lifecycle.accept(event) {
            return false;
        }

        match event.kind {
            TimeoutKind::Inactive => {
                if self.store.mark_inactive(&event.game_id) {
                    info!("Game marked as inactive {}", event.game_id);
                }
            }
            TimeoutKind::Expired => {
                info!("Removing expired game {}", event.game_id);
                if let Some(actions) = self.store.game_actions(&event.game_id) {
                    self.stats.record_play_time(actions);
                }
                self.store.remove_game(&event.game_id);
                self.reconciler.forget_game(&event.game_id);
            }
        }
        true
    }

    pub fn flush_stats(&mut self) -> PendingCounters {
        self.stats.flush()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleTimeoutManager {
        &self.lifecycle
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbound.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, rooms: Vec<RoomId>, exclude: Option<SocketAddr>) {
        if let Err(e) = self.outbound.send(GameMessage::BroadcastPacket {
            packet,
            rooms,
            exclude,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::LogReporter;
    use crate::stats::StatsSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{
        GameAction, StatCounter, TransitionError, GAME_EXPIRE_TIMEOUT, GAME_INACTIVE_TIMEOUT,
        IDLE_GAP_CUTOFF_MS,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(StatCounter, u64)>>,
    }

    impl RecordingSink {
        fn count(&self, counter: StatCounter) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == counter)
                .count()
        }
    }

    impl StatsSink for RecordingSink {
        fn increment(&self, counter: StatCounter, amount: u64) {
            self.calls.lock().unwrap().push((counter, amount));
        }
    }

    struct Harness<R: GameReducer> {
        replicator: StateReplicator<R>,
        outbound: mpsc::UnboundedReceiver<GameMessage>,
        events: mpsc::UnboundedReceiver<LifecycleEvent>,
        sink: Arc<RecordingSink>,
    }

    impl<R: GameReducer> Harness<R> {
        fn sent(&mut self) -> Vec<GameMessage> {
            let mut sent = Vec::new();
            while let Ok(message) = self.outbound.try_recv() {
                sent.push(message);
            }
            sent
        }
    }

    fn harness_with<R: GameReducer>(reducer: R) -> Harness<R> {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink::default());

        let replicator = StateReplicator::new(
            reducer,
            SessionStore::with_rng(StdRng::seed_from_u64(1)),
            LifecycleTimeoutManager::new(GAME_INACTIVE_TIMEOUT, GAME_EXPIRE_TIMEOUT, events_tx),
            StatsAggregator::new(sink.clone(), IDLE_GAP_CUTOFF_MS),
            ReconciliationHandler::new(Arc::new(LogReporter)),
            outbound_tx,
        );

        Harness {
            replicator,
            outbound,
            events,
            sink,
        }
    }

    fn harness() -> Harness<LedgerReducer> {
        harness_with(LedgerReducer)
    }

    fn origin() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn envelope(game: &Game, user: &User, action_id: u64, action: GameAction) -> ActionEnvelope {
        ActionEnvelope {
            action_id,
            game_id: game.id.clone(),
            user_id: user.id.clone(),
            action,
        }
    }

    fn new_game<R: GameReducer>(h: &mut Harness<R>) -> (User, Game) {
        let (user, session) = h.replicator.create_user("ana");
        let game = h.replicator.create_game(&session.id).unwrap();
        (user, game)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_game_requires_session() {
        let mut h = harness();
        assert!(matches!(
            h.replicator.create_game("nope"),
            Err(SyncError::UnknownSession(_))
        ));

        let (user, game) = new_game(&mut h);
        assert_eq!(game.players[0].user, user);
        assert!(h.replicator.lifecycle().is_armed(&game.id));
        assert_eq!(h.replicator.active_games(), vec![game]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_applied_state_matches_reducer() {
        let mut h = harness();
        let (user, game) = new_game(&mut h);

        let actions = vec![
            envelope(&game, &user, 10, GameAction::PlayerReady),
            envelope(&game, &user, 11, GameAction::MoveLeft),
            envelope(&game, &user, 12, GameAction::Drop { rows: 2 }),
            envelope(&game, &user, 13, GameAction::EnableAcceleration),
        ];

        let mut expected = game.clone();
        for action in &actions {
            expected = LedgerReducer.reduce(&expected, action).unwrap();
            assert_eq!(
                h.replicator.handle_action(origin(), action.clone()),
                ReplicationOutcome::Applied
            );
        }

        assert_eq!(h.replicator.game_snapshot(&game.id), Some(expected));
        assert_eq!(
            h.replicator.store().game_actions(&game.id),
            Some(&actions[..])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_applied_action_is_broadcast_without_origin() {
        let mut h = harness();
        let (user, game) = new_game(&mut h);
        h.sent();

        let action = envelope(&game, &user, 10, GameAction::PlayerReady);
        h.replicator.handle_action(origin(), action.clone());

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            GameMessage::BroadcastPacket {
                packet: Packet::GameAction(broadcast),
                rooms,
                exclude,
            } => {
                assert_eq!(broadcast, &action);
                assert_eq!(rooms, &vec![RoomId::Game(game.id.clone()), RoomId::Global]);
                assert_eq!(*exclude, Some(origin()));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_game_sends_game_removed_only() {
        let mut h = harness();
        let (user, mut game) = new_game(&mut h);
        game.id = "deadbeef".to_string();

        let outcome =
            h.replicator
                .handle_action(origin(), envelope(&game, &user, 5, GameAction::Rotate));

        assert_eq!(outcome, ReplicationOutcome::GameRemoved);
        assert!(h.replicator.store().game_actions("deadbeef").is_none());
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            GameMessage::SendPacket { packet: Packet::GameRemoved { game_id }, addr }
                if game_id == "deadbeef" && *addr == origin()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_actions_resync_once() {
        let mut h = harness();
        let (user, game) = new_game(&mut h);
        h.sent();

        // Dropping before everyone is ready fails in the reducer
        let first = h.replicator.handle_action(
            origin(),
            envelope(&game, &user, 10, GameAction::Drop { rows: 1 }),
        );
        let second = h.replicator.handle_action(
            origin(),
            envelope(&game, &user, 11, GameAction::Drop { rows: 1 }),
        );

        assert_eq!(first, ReplicationOutcome::Resynced);
        assert_eq!(second, ReplicationOutcome::Suppressed);
        assert_eq!(h.replicator.store().game_actions(&game.id), Some(&[][..]));

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            GameMessage::SendPacket {
                packet: Packet::GameSync { game: synced },
                addr,
            } => {
                assert_eq!(synced, &game);
                assert_eq!(*addr, origin());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_reducer_rejections_are_not_persisted() {
        let reject = |game: &Game, _: &ActionEnvelope| -> std::result::Result<Game, TransitionError> {
            Err(TransitionError::NotPlaying {
                game_id: game.id.clone(),
            })
        };
        let mut h = harness_with(reject);
        let (user, game) = new_game(&mut h);

        let outcome =
            h.replicator
                .handle_action(origin(), envelope(&game, &user, 10, GameAction::MoveLeft));

        assert_eq!(outcome, ReplicationOutcome::Resynced);
        assert_eq!(h.replicator.game_snapshot(&game.id), Some(game));
        assert_eq!(h.replicator.flush_stats(), PendingCounters::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive() {
        let mut h = harness();
        let (_, game) = new_game(&mut h);
        h.sent();

        assert!(h.replicator.handle_keep_alive(origin(), game.id.clone()));
        assert!(!h.replicator.handle_keep_alive(origin(), "gone0000".to_string()));

        let sent = h.sent();
        assert!(matches!(
            &sent[0],
            GameMessage::BroadcastPacket { packet: Packet::GameKeepAlive { .. }, rooms, exclude }
                if rooms == &vec![RoomId::Global] && *exclude == Some(origin())
        ));
        assert!(matches!(
            &sent[1],
            GameMessage::SendPacket { packet: Packet::GameRemoved { .. }, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_actions_flushed() {
        let mut h = harness();
        let (user, game) = new_game(&mut h);

        h.replicator
            .handle_action(origin(), envelope(&game, &user, 10, GameAction::MoveLeft));
        h.replicator
            .handle_action(origin(), envelope(&game, &user, 11, GameAction::Rotate));

        let flushed = h.replicator.flush_stats();
        assert_eq!(flushed.left, 1);
        assert_eq!(flushed.rotate, 1);
        assert_eq!(h.sink.count(StatCounter::ActionLeft), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_then_expired() {
        let mut h = harness();
        let (user, game) = new_game(&mut h);

        h.replicator
            .handle_action(origin(), envelope(&game, &user, 1_000, GameAction::PlayerReady));
        h.replicator
            .handle_action(origin(), envelope(&game, &user, 6_000, GameAction::Rotate));

        let inactive = h.events.recv().await.unwrap();
        assert_eq!(inactive.kind, TimeoutKind::Inactive);
        assert!(h.replicator.handle_lifecycle(&inactive));
        assert!(h.replicator.active_games().is_empty());
        assert!(h.replicator.game_snapshot(&game.id).is_some());

        let expired = h.events.recv().await.unwrap();
        assert_eq!(expired.kind, TimeoutKind::Expired);
        assert!(h.replicator.handle_lifecycle(&expired));
        assert!(h.replicator.game_snapshot(&game.id).is_none());
        assert!(h.replicator.store().game_actions(&game.id).is_none());
        assert!(!h.replicator.lifecycle().is_armed(&game.id));

        // Replaying the expiry does nothing
        assert!(!h.replicator.handle_lifecycle(&expired));

        let seconds: Vec<u64> = h
            .sink
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == StatCounter::Seconds)
            .map(|(_, amount)| *amount)
            .collect();
        assert_eq!(seconds, vec![5]);

        tokio::time::sleep(GAME_EXPIRE_TIMEOUT + Duration::from_secs(1)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_after_inactive_reactivates() {
        let mut h = harness();
        let (_, game) = new_game(&mut h);

        let inactive = h.events.recv().await.unwrap();
        h.replicator.handle_lifecycle(&inactive);
        assert!(h.replicator.active_games().is_empty());

        h.replicator.handle_keep_alive(origin(), game.id.clone());
        assert_eq!(h.replicator.active_games().len(), 1);
    }
}
