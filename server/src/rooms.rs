//! Connection tracking and room membership for the sync server
//!
//! This module handles the server-side bookkeeping of connected peers:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Room subscriptions (one game room or the global dashboard room)
//! - Resolving broadcast targets for a set of rooms
//!
//! Every connection also has an implicit private room, its own address,
//! which is what unicast replies are sent to.

use log::info;
use shared::RoomId;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer and the room it is subscribed to
#[derive(Debug)]
pub struct Connection {
    /// Network address, doubling as the connection's identity
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Named room joined through `Subscribe`, if any
    pub room: Option<RoomId>,
}

impl Connection {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
            room: None,
        }
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connections and the rooms they listen to
///
/// Subscribing joins exactly one room and leaves whatever room the
/// connection was in before, so a peer never receives updates for a game
/// it navigated away from.
pub struct RoomRegistry {
    connections: HashMap<SocketAddr, Connection>,
    max_connections: usize,
}

impl RoomRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a connection, refreshing it if already known
    ///
    /// Returns false when the server is at capacity.
    pub fn add_connection(&mut self, addr: SocketAddr) -> bool {
        if let Some(existing) = self.connections.get_mut(&addr) {
            existing.last_seen = Instant::now();
            return true;
        }

        if self.connections.len() >= self.max_connections {
            return false;
        }

        info!("Connection opened from {}", addr);
        self.connections.insert(addr, Connection::new(addr));
        true
    }

    pub fn remove_connection(&mut self, addr: &SocketAddr) -> bool {
        if let Some(connection) = self.connections.remove(addr) {
            info!("Connection from {} closed", connection.addr);
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }

    /// Marks the connection as alive. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: &SocketAddr) -> bool {
        match self.connections.get_mut(addr) {
            Some(connection) => {
                connection.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Moves the connection into `room`, leaving any previous room
    pub fn subscribe(&mut self, addr: &SocketAddr, room: RoomId) -> bool {
        match self.connections.get_mut(addr) {
            Some(connection) => {
                if let Some(previous) = connection.room.replace(room.clone()) {
                    if previous != room {
                        info!("{} left room {}", addr, previous);
                    }
                }
                info!("{} subscribed to room {}", addr, room);
                true
            }
            None => false,
        }
    }

    pub fn room_of(&self, addr: &SocketAddr) -> Option<&RoomId> {
        self.connections.get(addr).and_then(|c| c.room.as_ref())
    }

    /// Unique addresses subscribed to any of `rooms`, minus `exclude`
    pub fn members(&self, rooms: &[RoomId], exclude: Option<SocketAddr>) -> Vec<SocketAddr> {
        let wanted: HashSet<&RoomId> = rooms.iter().collect();
        self.connections
            .values()
            .filter(|c| Some(c.addr) != exclude)
            .filter(|c| c.room.as_ref().is_some_and(|room| wanted.contains(room)))
            .map(|c| c.addr)
            .collect()
    }

    /// Removes connections silent for longer than `timeout`
    ///
    /// Returns the removed addresses so the caller can log or clean up.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<SocketAddr> {
        let timed_out: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(timeout))
            .map(|c| c.addr)
            .collect();

        for addr in &timed_out {
            self.remove_connection(addr);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
