//! Types shared by the stackline server and client: wire protocol, game
//! model, timing constants, the action id clock and the reducer contract.

pub mod action_id;
pub mod reducer;

pub use action_id::{ActionIdGenerator, Clock, MockClock, SystemClock};
pub use reducer::{all_players_ready, GameReducer, LedgerReducer, TransitionError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub type UserId = String;
pub type SessionId = String;
pub type GameId = String;
/// Logical clock value, roughly milliseconds since the Unix epoch.
pub type ActionId = u64;

pub const PROTOCOL_VERSION: u32 = 1;

pub const MAX_NAME_LENGTH: usize = 12;
pub const MAX_PLAYERS: usize = 2;

pub const FPS: f64 = 60.0;
pub const FRAME_DURATION: Duration = Duration::from_micros(16_667);
/// Frames between drops when the player holds acceleration.
pub const DROP_FRAMES_ACCELERATED: f64 = 1.5;
/// Baseline frames between drops for a fresh game.
pub const DROP_FRAMES_DEFAULT: f64 = 48.0;

pub const GAME_INACTIVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const GAME_EXPIRE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Gaps between two actions of the same player at or above this are idle time.
pub const IDLE_GAP_CUTOFF_MS: u64 = 30_000;

/// Named broadcast group a connection can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomId {
    /// Dashboard observers; receives activity from every game.
    Global,
    Game(GameId),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Global => write!(f, "global"),
            RoomId::Game(game_id) => write!(f, "{}", game_id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Disconnect,
    Auth {
        name: String,
    },
    CreateGame {
        session_id: SessionId,
    },
    FetchGame {
        game_id: GameId,
    },
    FetchActiveGames,
    Subscribe {
        room: RoomId,
    },
    KeepAlive {
        game_id: GameId,
    },
    GameAction(ActionEnvelope),

    Connected,
    Disconnected {
        reason: String,
    },
    Authenticated {
        user: User,
        session: Session,
    },
    GameCreated {
        game: Game,
    },
    GameSnapshot {
        game: Game,
    },
    ActiveGames {
        games: Vec<Game>,
    },
    GameRemoved {
        game_id: GameId,
    },
    GameKeepAlive {
        game_id: GameId,
    },
    GameSync {
        game: Game,
    },
    Stats(StatsTotals),
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Pending,
    Ready,
    Paused,
    Won,
    Lost,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub user: User,
    pub last_action_id: ActionId,
    pub status: PlayerStatus,
    pub score: u64,
    pub lines: u64,
    pub drops: u64,
    pub drop_acceleration: bool,
}

impl Player {
    pub fn blank(user: User) -> Self {
        Self {
            user,
            last_action_id: 0,
            status: PlayerStatus::Pending,
            score: 0,
            lines: 0,
            drops: 0,
            drop_acceleration: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub players: Vec<Player>,
    /// Frames between drops for players without acceleration.
    pub drop_frames: f64,
}

impl Game {
    /// Blank game with `user` seated as the first player.
    pub fn blank(id: GameId, user: User) -> Self {
        Self {
            id,
            players: vec![Player::blank(user)],
            drop_frames: DROP_FRAMES_DEFAULT,
        }
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id() == user_id)
    }

    pub fn player_mut(&mut self, user_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id() == user_id)
    }
}

/// A player action as produced by the client simulation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum GameAction {
    JoinGame { user: User },
    PlayerReady,
    PlayerPause,
    Drop { rows: u32 },
    MoveLeft,
    MoveRight,
    Rotate,
    EnableAcceleration,
    DisableAcceleration,
    AppendPendingBlocks,
    Ping { time: u64 },
}

impl GameAction {
    pub fn name(&self) -> &'static str {
        match self {
            GameAction::JoinGame { .. } => "JOIN_GAME",
            GameAction::PlayerReady => "PLAYER_READY",
            GameAction::PlayerPause => "PLAYER_PAUSE",
            GameAction::Drop { .. } => "DROP",
            GameAction::MoveLeft => "MOVE_LEFT",
            GameAction::MoveRight => "MOVE_RIGHT",
            GameAction::Rotate => "ROTATE",
            GameAction::EnableAcceleration => "ENABLE_ACCELERATION",
            GameAction::DisableAcceleration => "DISABLE_ACCELERATION",
            GameAction::AppendPendingBlocks => "APPEND_PENDING_BLOCKS",
            GameAction::Ping { .. } => "PING",
        }
    }
}

/// A [`GameAction`] stamped with its logical clock id and routing addresses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActionEnvelope {
    pub action_id: ActionId,
    pub game_id: GameId,
    pub user_id: UserId,
    pub action: GameAction,
}

/// External counters tracked across every game.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCounter {
    Turns,
    Lines,
    ActionLeft,
    ActionRight,
    ActionAcc,
    ActionRotate,
    Seconds,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct StatsTotals {
    pub turns: u64,
    pub lines: u64,
    pub action_left: u64,
    pub action_right: u64,
    pub action_acc: u64,
    pub action_rotate: u64,
    pub seconds: u64,
}

impl StatsTotals {
    pub fn add(&mut self, counter: StatCounter, amount: u64) {
        let slot = match counter {
            StatCounter::Turns => &mut self.turns,
            StatCounter::Lines => &mut self.lines,
            StatCounter::ActionLeft => &mut self.action_left,
            StatCounter::ActionRight => &mut self.action_right,
            StatCounter::ActionAcc => &mut self.action_acc,
            StatCounter::ActionRotate => &mut self.action_rotate,
            StatCounter::Seconds => &mut self.seconds,
        };
        *slot = slot.saturating_add(amount);
    }
}
