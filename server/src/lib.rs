//! # Sync Server Library
//!
//! This library provides the authoritative server for the multiplayer
//! falling-block game. Clients simulate optimistically and send every action
//! they take; the server replays those actions through the shared reducer,
//! keeps the canonical game state and action log, and fans accepted actions
//! out to everyone watching.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Replication
//! Every inbound action envelope is applied to the stored game with the
//! reducer. Accepted envelopes are appended to the game's log and broadcast
//! to the game room and the dashboard room. Rejected envelopes are never
//! persisted or broadcast.
//!
//! ### Reconciliation
//! A client whose action was rejected has diverged. It receives one
//! authoritative snapshot of the game per distinct game state, no matter how
//! many queued actions it flushes after reconnecting.
//!
//! ### Session Lifecycle
//! Games are marked inactive (hidden from the dashboard) after a short
//! silence and deleted after a long one. Any join, ready, pause, accepted
//! action or keep-alive restarts both timers.
//!
//! ### Statistics
//! Control actions are counted in memory and flushed on an interval. Lines
//! and turns are forwarded as they happen. Play time is derived from the
//! action log when a game is deleted, ignoring idle gaps.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! The server processes all network events, timer expirations and stats
//! flushes sequentially in one loop. Envelopes for the same game are
//! therefore applied one at a time, and the log order always matches the
//! order of state transitions.
//!
//! ### UDP-Based Communication
//! Packets are bincode-encoded and sent over UDP. Broadcasts are fire and
//! forget; a client that misses updates is repaired by the resync path.
//!
//! ## Module Organization
//!
//! - `store`: users, sessions, games, action logs, active game index
//! - `lifecycle`: per-game inactive and expire timers
//! - `replicator`: applies envelopes and coordinates everything below
//! - `reconcile`: deduplicated resync of diverged clients
//! - `stats`: counter batching and play-time accounting
//! - `rooms`: connections and room membership
//! - `network`: sockets, sender/receiver tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_bind_addr("127.0.0.1:8080");
//!     let mut server = Server::new(config).await?;
//!
//!     // Runs until a shutdown message arrives:
//!     // - Receives packets and applies game actions in arrival order
//!     // - Fans accepted actions out to game and dashboard rooms
//!     // - Evicts idle games and flushes statistics
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod reconcile;
pub mod replicator;
pub mod rooms;
pub mod stats;
pub mod store;
