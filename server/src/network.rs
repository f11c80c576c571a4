//! Server network layer: UDP transport, room fan-out and the event loop
//! that feeds the replicator

use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::lifecycle::{LifecycleEvent, LifecycleTimeoutManager};
use crate::reconcile::{LogReporter, ReconciliationHandler};
use crate::replicator::StateReplicator;
use crate::rooms::RoomRegistry;
use crate::stats::{LocalStatsSink, StatsAggregator};
use crate::store::SessionStore;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{LedgerReducer, Packet, RoomId, StatsTotals, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ConnectionTimeout { addr: SocketAddr },
    Shutdown,
}

/// Messages sent from the server loop to the network sender
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    /// Fan out to everyone subscribed to any of `rooms`
    BroadcastPacket {
        packet: Packet,
        rooms: Vec<RoomId>,
        exclude: Option<SocketAddr>,
    },
}

/// Main server coordinating networking and game replication
pub struct Server {
    socket: Arc<UdpSocket>,
    rooms: Arc<RwLock<RoomRegistry>>,
    replicator: StateReplicator,
    stats: Arc<LocalStatsSink>,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
    lifecycle_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        let stats = Arc::new(LocalStatsSink::new());
        let replicator = StateReplicator::new(
            LedgerReducer,
            SessionStore::new(),
            LifecycleTimeoutManager::new(
                config.inactive_timeout,
                config.expire_timeout,
                lifecycle_tx,
            ),
            StatsAggregator::new(stats.clone(), config.idle_gap_cutoff_ms),
            ReconciliationHandler::new(Arc::new(LogReporter)),
            game_tx.clone(),
        );

        Ok(Server {
            socket,
            rooms: Arc::new(RwLock::new(RoomRegistry::new(config.max_connections))),
            replicator,
            stats,
            config,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
            lifecycle_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Handle for stopping a running server from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) -> Result<()> {
        let socket = Arc::clone(&self.socket);
        let rooms = Arc::clone(&self.rooms);
        let mut game_rx = self
            .game_rx
            .take()
            .ok_or(SyncError::ChannelClosed("outbound"))?;

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket {
                        packet,
                        rooms: targets,
                        exclude,
                    } => {
                        let members = {
                            let rooms_guard = rooms.read().await;
                            rooms_guard.members(&targets, exclude)
                        };

                        for addr in members {
                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Spawns task that monitors connection timeouts
    fn spawn_timeout_checker(&self) {
        let rooms = Arc::clone(&self.rooms);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.connection_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut rooms_guard = rooms.write().await;
                    rooms_guard.check_timeouts(timeout)
                };

                for addr in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ConnectionTimeout { addr }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Spawns task that pushes counter totals to the dashboard room
    fn spawn_stats_broadcaster(&self) {
        let mut totals_rx: watch::Receiver<StatsTotals> = self.stats.subscribe();
        let game_tx = self.game_tx.clone();

        tokio::spawn(async move {
            while totals_rx.changed().await.is_ok() {
                let totals = totals_rx.borrow_and_update().clone();
                let message = GameMessage::BroadcastPacket {
                    packet: Packet::Stats(totals),
                    rooms: vec![RoomId::Global],
                    exclude: None,
                };
                if game_tx.send(message).is_err() {
                    break;
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes one inbound packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            info!("Client connecting from {} (version: {})", addr, client_version);

            if client_version != PROTOCOL_VERSION {
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    },
                    addr,
                );
                return;
            }

            let accepted = self.rooms.write().await.add_connection(addr);
            let response = if accepted {
                Packet::Connected
            } else {
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                }
            };
            self.send_packet(response, addr);
            return;
        }

        if !self.rooms.write().await.touch(&addr) {
            debug!("Rejecting packet from unconnected peer {}", addr);
            self.send_packet(
                Packet::Disconnected {
                    reason: "Not connected".to_string(),
                },
                addr,
            );
            return;
        }

        match packet {
            Packet::Disconnect => {
                self.rooms.write().await.remove_connection(&addr);
            }

            Packet::Auth { name } => {
                let (user, session) = self.replicator.create_user(&name);
                self.send_packet(Packet::Authenticated { user, session }, addr);
            }

            Packet::CreateGame { session_id } => match self.replicator.create_game(&session_id) {
                Ok(game) => self.send_packet(Packet::GameCreated { game }, addr),
                Err(e) => {
                    warn!("Create game from {} failed: {}", addr, e);
                    self.send_packet(
                        Packet::Error {
                            message: e.to_string(),
                        },
                        addr,
                    );
                }
            },

            Packet::FetchGame { game_id } => {
                let response = match self.replicator.game_snapshot(&game_id) {
                    Some(game) => Packet::GameSnapshot { game },
                    None => Packet::GameRemoved { game_id },
                };
                self.send_packet(response, addr);
            }

            Packet::FetchActiveGames => {
                let games = self.replicator.active_games();
                self.send_packet(Packet::ActiveGames { games }, addr);
            }

            Packet::Subscribe { room } => {
                self.rooms.write().await.subscribe(&addr, room);
            }

            Packet::KeepAlive { game_id } => {
                self.replicator.handle_keep_alive(addr, game_id);
            }

            Packet::GameAction(envelope) => {
                let outcome = self.replicator.handle_action(addr, envelope);
                debug!("Action from {}: {:?}", addr, outcome);
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<()> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender()?;
        self.spawn_timeout_checker();
        self.spawn_stats_broadcaster();

        let mut flush_interval = interval(self.config.stats_flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first tick since it fires immediately
        flush_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ConnectionTimeout { addr }) => {
                            info!("Connection from {} timed out", addr);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle game timers
                Some(event) = self.lifecycle_rx.recv() => {
                    self.replicator.handle_lifecycle(&event);
                },

                _ = flush_interval.tick() => {
                    self.replicator.flush_stats();
                },
            }
        }

        Ok(())
    }
}

async fn send_packet_impl(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> Result<()> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
