use crate::dashboard::Dashboard;
use crate::dispatch::ActionDispatcher;
use crate::error::{ClientError, Result};
use crate::game::ClientGameState;
use crate::scheduler::{FrameScheduler, IntervalFrames};
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{
    GameAction, GameId, Packet, RoomId, Session, GAME_INACTIVE_TIMEOUT, KEEP_ALIVE_INTERVAL,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;

/// What the client does once authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Create a new game and play it
    Create,
    /// Join an existing game and play it
    Join(GameId),
    /// Observe every active game from the global room
    Watch,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    name: String,
    mode: Mode,
    connected: bool,
    session: Option<Session>,

    game_state: ClientGameState,
    dispatcher: ActionDispatcher,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    dashboard: Dashboard,

    scheduler: FrameScheduler,
    pace_tx: watch::Sender<Option<f64>>,
    drops_tx: mpsc::UnboundedSender<u32>,
    drops_rx: mpsc::UnboundedReceiver<u32>,
}

impl Client {
    pub async fn new(server_addr: &str, name: &str, mode: Mode) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (pace_tx, _) = watch::channel(None);
        let (drops_tx, drops_rx) = mpsc::unbounded_channel();

        Ok(Client {
            socket,
            server_addr,
            name: name.to_string(),
            mode,
            connected: false,
            session: None,
            game_state: ClientGameState::new(),
            dispatcher: ActionDispatcher::new(outbound_tx),
            outbound_rx,
            dashboard: Dashboard::new(GAME_INACTIVE_TIMEOUT),
            scheduler: FrameScheduler::new(),
            pace_tx,
            drops_tx,
            drops_rx,
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    fn dispatch(&mut self, action: GameAction) {
        if let Err(e) = self.dispatcher.dispatch(&mut self.game_state, action) {
            warn!("Action not dispatched: {}", e);
        }
    }

    /// Publishes the current drop pace and starts the frame loop when a
    /// round is running without one
    fn refresh_pace(&mut self) {
        let pace = self.game_state.drop_pace();
        self.pace_tx.send_replace(pace);

        if pace.is_some() && !self.scheduler.is_running() {
            info!("All players ready, starting frame loop");
            self.scheduler.start(
                IntervalFrames::new(),
                self.pace_tx.subscribe(),
                self.drops_tx.clone(),
            );
        }
    }

    /// Packet that keeps this connection alive on the server. Watchers
    /// have no game, so they refresh the active list instead.
    fn heartbeat(&self) -> Option<Packet> {
        if self.session.is_none() {
            return None;
        }
        match (&self.mode, self.game_state.game_id()) {
            (Mode::Watch, _) => Some(Packet::FetchActiveGames),
            (_, Some(game_id)) => Some(Packet::KeepAlive {
                game_id: game_id.clone(),
            }),
            (_, None) => None,
        }
    }

    async fn enter_game(&mut self) -> Result<()> {
        let (Some(user), Some(game)) = (self.game_state.user(), self.game_state.game()) else {
            return Ok(());
        };
        let user = user.clone();
        let game_id = game.id.clone();
        let seated = game.player(&user.id).is_some();

        self.send_packet(&Packet::Subscribe {
            room: RoomId::Game(game_id.clone()),
        })
        .await?;

        if !seated {
            info!("Joining game {}", game_id);
            self.dispatch(GameAction::JoinGame { user });
        }
        self.dispatch(GameAction::PlayerReady);
        Ok(())
    }

    /// Handles one packet from the server. Returns false when the client
    /// should stop.
    async fn handle_packet(&mut self, packet: Packet) -> Result<bool> {
        match packet {
            Packet::Connected => {
                info!("Connected to {}", self.server_addr);
                self.connected = true;
                self.send_packet(&Packet::Auth {
                    name: self.name.clone(),
                })
                .await?;
            }

            Packet::Disconnected { reason } => {
                self.connected = false;
                return Err(ClientError::Refused(reason));
            }

            Packet::Authenticated { user, session } => {
                info!("Authenticated as {} ({})", user.name, user.id);
                self.game_state.set_user(user);

                let request = match &self.mode {
                    Mode::Create => Packet::CreateGame {
                        session_id: session.id.clone(),
                    },
                    Mode::Join(game_id) => Packet::FetchGame {
                        game_id: game_id.clone(),
                    },
                    Mode::Watch => {
                        self.send_packet(&Packet::Subscribe {
                            room: RoomId::Global,
                        })
                        .await?;
                        Packet::FetchActiveGames
                    }
                };
                self.session = Some(session);
                self.send_packet(&request).await?;
            }

            Packet::GameCreated { game } | Packet::GameSnapshot { game } => {
                if self.mode == Mode::Watch {
                    self.dashboard.upsert(game);
                } else {
                    info!("Loaded game {}", game.id);
                    self.game_state.load_game(game);
                    self.enter_game().await?;
                }
            }

            Packet::ActiveGames { games } => self.dashboard.load(games),

            Packet::GameAction(envelope) => {
                if self.mode == Mode::Watch {
                    if !self.dashboard.apply_action(&envelope) {
                        self.send_packet(&Packet::FetchGame {
                            game_id: envelope.game_id,
                        })
                        .await?;
                    }
                } else {
                    self.game_state.apply_remote(&envelope);
                }
            }

            Packet::GameKeepAlive { game_id } => {
                self.dashboard.keep_alive(&game_id);
            }

            Packet::GameSync { game } => {
                let game_id = game.id.clone();
                self.game_state.apply_sync(game);
                // Rejoin the room in case the server lost track of us
                self.send_packet(&Packet::Subscribe {
                    room: RoomId::Game(game_id),
                })
                .await?;
            }

            Packet::GameRemoved { game_id } => {
                if self.mode == Mode::Watch {
                    self.dashboard.remove(&game_id);
                } else if self.game_state.remove_game(&game_id) {
                    warn!("Game {} was removed by the server", game_id);
                    self.scheduler.cancel();
                    return Ok(false);
                }
            }

            Packet::Stats(totals) => {
                info!(
                    "Totals: {} turns, {} lines, {}s played",
                    totals.turns, totals.lines, totals.seconds
                );
                self.dashboard.set_totals(totals);
            }

            Packet::Error { message } => {
                warn!("Server error: {}", message);
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }

        self.refresh_pace();
        Ok(true)
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Connecting to server...");
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        let mut keep_alive_interval = interval(KEEP_ALIVE_INTERVAL);
        let mut prune_interval = interval(Duration::from_secs(1));

        let mut buffer = vec![0u8; 65536];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                if !self.handle_packet(packet).await? {
                                    break;
                                }
                            } else {
                                warn!("Failed to deserialize packet from server");
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                Some(packet) = self.outbound_rx.recv() => {
                    self.send_packet(&packet).await?;
                },

                Some(rows) = self.drops_rx.recv() => {
                    self.dispatch(GameAction::Drop { rows });
                    self.refresh_pace();
                },

                _ = keep_alive_interval.tick() => {
                    if let Some(packet) = self.heartbeat() {
                        self.send_packet(&packet).await?;
                    }
                },

                _ = prune_interval.tick() => {
                    if self.mode == Mode::Watch {
                        self.dashboard.prune();
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                    break;
                },
            }
        }

        self.scheduler.cancel();
        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
