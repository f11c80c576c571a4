//! # Game Client Library
//!
//! This library provides the client side of the multiplayer falling-block
//! game's synchronization layer: optimistic local state, action dispatch,
//! frame-paced drops and the UDP connection to the authoritative server.
//!
//! ## Architecture Overview
//!
//! ### Optimistic Simulation
//! Every local action is stamped with a logical clock id and applied to the
//! local copy of the game immediately, then sent to the server. The player
//! never waits for a round trip to see the result of their own input.
//!
//! ### Server Reconciliation
//! Actions from other players arrive as server broadcasts and are applied to
//! the local copy as they come. When the server rejects one of our actions
//! it sends its authoritative game instead, which replaces the local copy
//! and discards the local actions it never accepted.
//!
//! ### Frame Pacing
//! While every player is ready, a frame loop accumulates fractional drop
//! progress at the display rate and dispatches a `Drop` whenever a whole
//! row is reached. Acceleration changes the pace on the next tick.
//!
//! ## Module Organization
//!
//! - `game`: the current user, game and local action history
//! - `dispatch`: stamping and sending actions
//! - `scheduler`: drop progress and the frame loop
//! - `dashboard`: observer view of all active games
//! - `network`: UDP connection and the client event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, Mode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", "ana", Mode::Create).await?;
//!
//!     // Connects, authenticates, creates a game, readies up and keeps
//!     // dropping pieces until the game is removed or Ctrl+C
//!     client.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod network;
pub mod scheduler;
