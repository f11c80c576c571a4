//! Observer view of every active game
//!
//! Fed by the global room: action broadcasts, keep-alives and stats. Games
//! the observer has not heard about for the inactivity timeout are dropped
//! locally, mirroring how the server hides them.

use log::{debug, info};
use shared::{ActionEnvelope, Game, GameId, GameReducer, LedgerReducer, StatsTotals};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    game: Game,
    last_seen: Instant,
}

pub struct Dashboard {
    games: HashMap<GameId, Entry>,
    inactive_timeout: Duration,
    totals: Option<StatsTotals>,
    reducer: LedgerReducer,
}

impl Dashboard {
    pub fn new(inactive_timeout: Duration) -> Self {
        Self {
            games: HashMap::new(),
            inactive_timeout,
            totals: None,
            reducer: LedgerReducer,
        }
    }

    pub fn load(&mut self, games: Vec<Game>) {
        let now = Instant::now();
        for game in games {
            self.games.insert(
                game.id.clone(),
                Entry {
                    game,
                    last_seen: now,
                },
            );
        }
        info!("Watching {} games", self.games.len());
    }

    /// Applies a broadcast action. Unknown games are fetched by the caller.
    ///
    /// Returns false when the game is not on the dashboard.
    pub fn apply_action(&mut self, envelope: &ActionEnvelope) -> bool {
        let Some(entry) = self.games.get_mut(&envelope.game_id) else {
            return false;
        };

        entry.last_seen = Instant::now();
        match self.reducer.reduce(&entry.game, envelope) {
            Ok(game) => entry.game = game,
            Err(e) => debug!("Dashboard copy of {} diverged: {}", envelope.game_id, e),
        }
        true
    }

    /// Returns false when the game is not on the dashboard
    pub fn keep_alive(&mut self, game_id: &str) -> bool {
        match self.games.get_mut(game_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces a game, e.g. after fetching one seen for the first time
    pub fn upsert(&mut self, game: Game) {
        self.games.insert(
            game.id.clone(),
            Entry {
                game,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, game_id: &str) -> bool {
        self.games.remove(game_id).is_some()
    }

    /// Drops games silent for longer than the inactivity timeout
    pub fn prune(&mut self) -> Vec<GameId> {
        let timeout = self.inactive_timeout;
        let stale: Vec<GameId> = self
            .games
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for game_id in &stale {
            self.games.remove(game_id);
            debug!("Game {} went quiet", game_id);
        }
        stale
    }

    pub fn set_totals(&mut self, totals: StatsTotals) {
        self.totals = Some(totals);
    }

    pub fn totals(&self) -> Option<&StatsTotals> {
        self.totals.as_ref()
    }

    pub fn game(&self, game_id: &str) -> Option<&Game> {
        self.games.get(game_id).map(|entry| &entry.game)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
