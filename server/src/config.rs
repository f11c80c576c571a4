//! Runtime settings for the sync server

use crate::error::{Result, SyncError};
use shared::{
    CONNECTION_TIMEOUT, GAME_EXPIRE_TIMEOUT, GAME_INACTIVE_TIMEOUT, IDLE_GAP_CUTOFF_MS,
    STATS_FLUSH_INTERVAL,
};
use std::time::Duration;

/// Upper bound on games returned for one `FetchActiveGames` request so the
/// reply fits in a single datagram.
pub const MAX_ACTIVE_GAMES_REPLY: usize = 64;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    /// Silence after which a game leaves the dashboard
    pub inactive_timeout: Duration,
    /// Silence after which a game is deleted
    pub expire_timeout: Duration,
    pub stats_flush_interval: Duration,
    /// Silence after which a connection is dropped
    pub connection_timeout: Duration,
    pub idle_gap_cutoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_connections: 256,
            inactive_timeout: GAME_INACTIVE_TIMEOUT,
            expire_timeout: GAME_EXPIRE_TIMEOUT,
            stats_flush_interval: STATS_FLUSH_INTERVAL,
            connection_timeout: CONNECTION_TIMEOUT,
            idle_gap_cutoff_ms: IDLE_GAP_CUTOFF_MS,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Rejects settings the server loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stats_flush_interval.is_zero() {
            return Err(SyncError::InvalidConfig("stats flush interval must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(SyncError::InvalidConfig("max connections must be non-zero"));
        }
        Ok(())
    }
}
