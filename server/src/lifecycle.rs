//! Two-stage eviction of idle games
//!
//! Every game owns two timers. The inactive timer hides the game from the
//! dashboard; the expire timer deletes it. Any qualifying activity re-arms
//! both from the current instant. Fired timers are delivered to the server
//! loop as [`LifecycleEvent`]s rather than acting on shared state directly.

use crate::store::ActiveGameIndex;
use log::debug;
use shared::GameId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Inactive,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub game_id: GameId,
    pub kind: TimeoutKind,
    /// Arming this event belongs to; stale generations are ignored.
    pub generation: u64,
}

struct GameTimers {
    generation: u64,
    inactive: JoinHandle<()>,
    expire: JoinHandle<()>,
}

impl GameTimers {
    fn abort(&self) {
        self.inactive.abort();
        self.expire.abort();
    }
}

pub struct LifecycleTimeoutManager {
    timers: HashMap<GameId, GameTimers>,
    inactive_timeout: Duration,
    expire_timeout: Duration,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    next_generation: u64,
}

impl LifecycleTimeoutManager {
    pub fn new(
        inactive_timeout: Duration,
        expire_timeout: Duration,
        events: mpsc::UnboundedSender<LifecycleEvent>,
    ) -> Self {
        Self {
            timers: HashMap::new(),
            inactive_timeout,
            expire_timeout,
            events,
            next_generation: 1,
        }
    }

    /// Marks the game active and restarts both timers from now
    ///
    /// Must run inside a tokio runtime.
    pub fn bump(&mut self, game_id: &GameId, active: &mut ActiveGameIndex) {
        if active.insert(game_id) {
            debug!("Game {} active again", game_id);
        }

        if let Some(previous) = self.timers.remove(game_id) {
            previous.abort();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let now = Instant::now();
        let timers = GameTimers {
            generation,
            inactive: self.spawn_timer(
                game_id,
                TimeoutKind::Inactive,
                generation,
                now + self.inactive_timeout,
            ),
            expire: self.spawn_timer(
                game_id,
                TimeoutKind::Expired,
                generation,
                now + self.expire_timeout,
            ),
        };
        self.timers.insert(game_id.clone(), timers);
    }

    fn spawn_timer(
        &self,
        game_id: &GameId,
        kind: TimeoutKind,
        generation: u64,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let event = LifecycleEvent {
            game_id: game_id.clone(),
            kind,
            generation,
        };

        tokio::spawn(async move {
            sleep_until(deadline).await;
            // Receiver gone means the server is shutting down
            let _ = events.send(event);
        })
    }

    /// Checks a fired event against the current arming
    ///
    /// Returns false for events from a generation that has since been
    /// re-armed or forgotten. Accepting an expiry drops the game's timers.
    pub fn accept(&mut self, event: &LifecycleEvent) -> bool {
        let current = match self.timers.get(&event.game_id) {
            Some(timers) => timers.generation,
            None => {
                debug!("Ignoring {:?} for untracked game {}", event.kind, event.game_id);
                return false;
            }
        };

        if current != event.generation {
            debug!(
                "Ignoring stale {:?} for game {} (generation {} != {})",
                event.kind, event.game_id, event.generation, current
            );
            return false;
        }

        if event.kind == TimeoutKind::Expired {
            self.forget(&event.game_id);
        }
        true
    }

    /// Cancels both timers of a game and stops tracking it
    pub fn forget(&mut self, game_id: &str) {
        if let Some(timers) = self.timers.remove(game_id) {
            timers.abort();
        }
    }

    pub fn is_armed(&self, game_id: &str) -> bool {
        self.timers.contains_key(game_id)
    }

    /// Number of games with armed timers
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for LifecycleTimeoutManager {
    fn drop(&mut self) {
        for timers in self.timers.values() {
            timers.abort();
        }
    }
}
