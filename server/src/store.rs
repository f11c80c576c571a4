//! In-memory authoritative state: users, sessions, games, per-game action
//! logs and the index of games shown on the dashboard.
//!
//! All mutation goes through [`SessionStore`] so the log/game pairing and
//! the active index stay consistent.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    ActionEnvelope, Game, GameId, Session, SessionId, User, UserId, MAX_NAME_LENGTH,
};
use std::collections::HashMap;

/// Ordered set of game ids currently visible on the dashboard
#[derive(Debug, Default, Clone)]
pub struct ActiveGameIndex {
    ids: Vec<GameId>,
}

impl ActiveGameIndex {
    /// Adds the id unless already present. Returns true if it was added.
    pub fn insert(&mut self, game_id: &GameId) -> bool {
        if self.contains(game_id) {
            return false;
        }
        self.ids.push(game_id.clone());
        true
    }

    pub fn remove(&mut self, game_id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| id != game_id);
        self.ids.len() != before
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.ids.iter().any(|id| id == game_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct SessionStore {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    games: HashMap<GameId, Game>,
    game_actions: HashMap<GameId, Vec<ActionEnvelope>>,
    active_games: ActiveGameIndex,
    rng: StdRng,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Store drawing ids from a caller-provided generator
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            users: HashMap::new(),
            sessions: HashMap::new(),
            games: HashMap::new(),
            game_actions: HashMap::new(),
            active_games: ActiveGameIndex::default(),
            rng,
        }
    }

    pub fn insert_user(&mut self, name: &str) -> User {
        let id = gen_rand_uniq_id(&mut self.rng, &self.users);
        let user = User {
            id: id.clone(),
            name: name.chars().take(MAX_NAME_LENGTH).collect(),
        };
        self.users.insert(id, user.clone());
        user
    }

    pub fn insert_session(&mut self, user_id: &UserId) -> Session {
        let id = gen_rand_uniq_id(&mut self.rng, &self.sessions);
        let session = Session {
            id: id.clone(),
            user_id: user_id.clone(),
        };
        self.sessions.insert(id, session.clone());
        session
    }

    /// Creates a blank game owned by `user` with an empty log, marked active
    ///
    /// Arming the lifecycle timers is the caller's job.
    pub fn insert_game(&mut self, user: &User) -> Game {
        let id = gen_rand_uniq_id(&mut self.rng, &self.games);
        let game = Game::blank(id.clone(), user.clone());

        self.games.insert(id.clone(), game.clone());
        self.game_actions.insert(id.clone(), Vec::new());
        self.active_games.insert(&id);

        info!("Game {} created by {}", id, user.id);
        game
    }

    /// Appends an envelope to its game's log
    ///
    /// Only call this after the reducer accepted the envelope. Returns false
    /// if the game (and therefore its log) no longer exists.
    pub fn save_game_action(&mut self, envelope: ActionEnvelope) -> bool {
        match self.game_actions.get_mut(&envelope.game_id) {
            Some(log) => {
                log.push(envelope);
                true
            }
            None => {
                warn!(
                    "Dropping action {} for missing game {}",
                    envelope.action_id, envelope.game_id
                );
                false
            }
        }
    }

    /// Swaps in the next authoritative state for an existing game
    pub fn replace_game(&mut self, game: Game) -> bool {
        match self.games.get_mut(&game.id) {
            Some(slot) => {
                *slot = game;
                true
            }
            None => false,
        }
    }

    /// Deletes the game together with its log and active index entry
    pub fn remove_game(&mut self, game_id: &str) -> Option<(Game, Vec<ActionEnvelope>)> {
        let game = self.games.remove(game_id)?;
        let actions = self.game_actions.remove(game_id).unwrap_or_default();
        self.active_games.remove(game_id);

        info!("Removed game {}", game_id);
        info!("Total games: {}", self.game_count());
        info!("Total game actions: {}", self.action_count());
        info!("Active games: {}", self.active_games.len());

        Some((game, actions))
    }

    /// Hides the game from the dashboard; game and log are kept
    pub fn mark_inactive(&mut self, game_id: &str) -> bool {
        self.active_games.remove(game_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn game(&self, game_id: &str) -> Option<&Game> {
        self.games.get(game_id)
    }

    pub fn game_actions(&self, game_id: &str) -> Option<&[ActionEnvelope]> {
        self.game_actions.get(game_id).map(Vec::as_slice)
    }

    pub fn active_games(&self) -> &ActiveGameIndex {
        &self.active_games
    }

    pub fn active_games_mut(&mut self) -> &mut ActiveGameIndex {
        &mut self.active_games
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn action_count(&self) -> usize {
        self.game_actions.values().map(Vec::len).sum()
    }
}

/// Draws random ids until one is not a key of `collection`
///
/// There is no retry bound; the id space is assumed to stay sparse.
fn gen_rand_uniq_id<V>(rng: &mut StdRng, collection: &HashMap<String, V>) -> String {
    loop {
        let id = gen_rand_id(rng);
        if !collection.contains_key(&id) {
            return id;
        }
        debug!("Random id {} already taken, retrying", id);
    }
}

fn gen_rand_id(rng: &mut StdRng) -> String {
    format!("{:08x}", rng.gen::<u32>())
}
