//! WebSocket Lobby Server
//!
//! Accept loop, per-connection tasks, and the protocol dispatcher.
//!
//! Each connection gets a reader task (this module's loop) and a writer
//! task fed by an `mpsc` channel, so one connection's outbound writes are
//! strictly ordered no matter which task produced them. The dispatcher
//! decodes envelopes in two phases, applies the authentication gate, routes
//! to registry operations, and hands the resulting delivery batches to the
//! broadcast engine — always after the registry lock is released.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::auth::{AuthGate, Identity};
use crate::network::broadcast::Broadcaster;
use crate::network::protocol::{self, ClientMessage, ServerMessage};
use crate::network::registry::{Registry, UnknownSession};
use crate::network::session::{ConnId, SessionHandle, SessionPhase};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 4000).into(),
            max_connections: 1000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables (`PORT`, default 4000).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.bind_addr.set_port(port),
                Err(_) => warn!("ignoring unparseable PORT value {:?}", port),
            }
        }
        config
    }
}

/// Lobby server errors.
#[derive(Debug, thiserror::Error)]
pub enum LobbyServerError {
    /// Failed to bind to the configured address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The lobby server: owns the registry and accepts WebSocket connections.
pub struct LobbyServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    gate: Arc<AuthGate>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LobbyServer {
    /// Create a new lobby server.
    pub fn new(config: ServerConfig, gate: AuthGate) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            broadcaster,
            gate: Arc::new(gate),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), LobbyServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("lobby server v{} listening on {}", self.config.version, self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Relaxed) >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn the reader and writer tasks for one connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let broadcaster = self.broadcaster.clone();
        let gate = self.gate.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("websocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Writer task: the single point of egress for this connection.
            let writer_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let close = Arc::new(Notify::new());
            let mut conn = Connection {
                registry: registry.clone(),
                broadcaster: broadcaster.clone(),
                gate,
                sender: msg_tx,
                conn_id: ConnId::generate(),
                close: close.clone(),
                identity: None,
                phase: SessionPhase::Unauthenticated,
            };

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if conn.handle_text(&text).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let reply = ServerMessage::Error {
                                    message: "invalid message format".to_string(),
                                    request: None,
                                };
                                if conn.reply(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = close.notified() => {
                        debug!("connection {} superseded", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup runs exactly once per connection; the registry makes
            // it a no-op if a broadcast failure already closed us.
            if let Some(identity) = conn.identity.take() {
                conn.phase = SessionPhase::Closed;
                let deliveries = registry.disconnect(identity.player_id, conn.conn_id).await;
                broadcaster.deliver(deliveries).await;
            }

            drop(conn);
            writer_task.abort();
            connections.fetch_sub(1, Ordering::Relaxed);
            debug!("connection {} cleaned up", addr);
        });
    }

    /// Shut the server down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of live connections (including unauthenticated ones).
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Number of authenticated sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}

/// The writer-side channel for this connection is gone; the connection is
/// over and the reader loop should exit.
struct ConnectionClosed;

/// Per-connection dispatcher state.
struct Connection {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    gate: Arc<AuthGate>,
    sender: mpsc::Sender<ServerMessage>,
    conn_id: ConnId,
    close: Arc<Notify>,
    identity: Option<Identity>,
    phase: SessionPhase,
}

impl Connection {
    /// Send a direct reply to this connection's peer.
    async fn reply(&self, msg: ServerMessage) -> Result<(), ConnectionClosed> {
        self.sender.send(msg).await.map_err(|_| ConnectionClosed)
    }

    /// Handle one inbound text frame.
    ///
    /// Every recoverable failure is reported as an `error` envelope and
    /// leaves the loop running; `Err` here means only that the transport
    /// itself is gone.
    async fn handle_text(&mut self, text: &str) -> Result<(), ConnectionClosed> {
        let (message, token) = match protocol::decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                let request = e.kind().map(str::to_string);
                return self.reply(ServerMessage::Error { message: e.to_string(), request }).await;
            }
        };

        match message {
            ClientMessage::Login { username, password } => {
                self.handle_login(&username, &password).await
            }
            ClientMessage::Register { username, password } => {
                self.handle_register(&username, &password).await
            }
            request => {
                if self.phase != SessionPhase::Authenticated {
                    match token {
                        // Token rejections were already reported to the peer.
                        Some(token) => {
                            if !self.try_resume(&token).await? {
                                return Ok(());
                            }
                        }
                        None => {
                            return self
                                .reply(ServerMessage::Error {
                                    message: "authentication required".to_string(),
                                    request: Some(request.kind().to_string()),
                                })
                                .await;
                        }
                    }
                }
                self.route(request).await
            }
        }
    }

    async fn handle_login(&mut self, username: &str, password: &str) -> Result<(), ConnectionClosed> {
        if self.phase == SessionPhase::Authenticated {
            return self
                .reply(ServerMessage::Error {
                    message: "already authenticated".to_string(),
                    request: Some("login".to_string()),
                })
                .await;
        }

        match self.gate.login(username, password) {
            Ok((identity, token)) => {
                self.reply(ServerMessage::LoginSuccessful {
                    token,
                    player_id: identity.player_id,
                    name: identity.name.clone(),
                })
                .await?;
                self.attach(identity).await
            }
            Err(e) => self.reply(ServerMessage::LoginFailed { message: e.to_string() }).await,
        }
    }

    async fn handle_register(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), ConnectionClosed> {
        if self.phase == SessionPhase::Authenticated {
            return self
                .reply(ServerMessage::Error {
                    message: "already authenticated".to_string(),
                    request: Some("register".to_string()),
                })
                .await;
        }

        match self.gate.register(username, password) {
            Ok((identity, token)) => {
                self.reply(ServerMessage::RegisterSuccessful {
                    token,
                    player_id: identity.player_id,
                    name: identity.name.clone(),
                })
                .await?;
                self.attach(identity).await
            }
            Err(e) => self.reply(ServerMessage::RegisterFailed { message: e.to_string() }).await,
        }
    }

    /// The reconnect path: a token-bearing envelope on an unauthenticated
    /// session. Returns whether the session is now authenticated; a
    /// rejection has already been reported to the peer.
    async fn try_resume(&mut self, token: &str) -> Result<bool, ConnectionClosed> {
        match self.gate.resume(token) {
            Ok(identity) => {
                debug!(player = %identity.player_id, "session resumed via token");
                self.attach(identity).await?;
                Ok(true)
            }
            Err(e) => {
                self.reply(ServerMessage::Error { message: e.to_string(), request: None }).await?;
                Ok(false)
            }
        }
    }

    /// Bind an authenticated identity to the registry and welcome the peer.
    async fn attach(&mut self, identity: Identity) -> Result<(), ConnectionClosed> {
        let handle = SessionHandle::new(
            identity.player_id,
            identity.name.clone(),
            self.conn_id,
            self.sender.clone(),
            self.close.clone(),
        );
        let outcome = self.registry.attach_session(handle).await;

        if let Some(stale) = outcome.superseded {
            if stale.conn_id != self.conn_id {
                debug!(player = %identity.player_id, stale = %stale.conn_id,
                    "superseding stale session");
                stale.close.notify_one();
            }
        }

        let welcome = ServerMessage::Welcome {
            player_id: identity.player_id,
            name: identity.name.clone(),
            lobbies: outcome.directory,
        };
        self.identity = Some(identity);
        self.phase = SessionPhase::Authenticated;
        self.reply(welcome).await
    }

    /// Route an authenticated request to the registry.
    async fn route(&mut self, message: ClientMessage) -> Result<(), ConnectionClosed> {
        let Some(identity) = self.identity.clone() else {
            // Routing is only reached after the gate; nothing to do.
            return Ok(());
        };

        match message {
            ClientMessage::CreateLobby { name, max_players, is_private, password } => {
                match self
                    .registry
                    .create_lobby(&identity, name, max_players as usize, is_private, password)
                    .await
                {
                    Ok((lobby, deliveries)) => {
                        self.reply(ServerMessage::LobbyCreated { lobby }).await?;
                        self.broadcaster.deliver(deliveries).await;
                        Ok(())
                    }
                    Err(UnknownSession) => {
                        self.reply(ServerMessage::Error {
                            message: UnknownSession.to_string(),
                            request: Some("create_lobby".to_string()),
                        })
                        .await
                    }
                }
            }
            ClientMessage::JoinLobby { lobby_id, password } => {
                match self.registry.join_lobby(&identity, lobby_id, &password).await {
                    Ok((lobby, deliveries)) => {
                        self.reply(ServerMessage::JoinLobbySuccessful { lobby }).await?;
                        self.broadcaster.deliver(deliveries).await;
                        Ok(())
                    }
                    Err(e) => {
                        self.reply(ServerMessage::JoinLobbyFailed { reason: e.into() }).await
                    }
                }
            }
            ClientMessage::LeaveLobby { lobby_id } => {
                let (removed, deliveries) =
                    self.registry.leave_lobby(identity.player_id, lobby_id).await;
                if removed {
                    self.reply(ServerMessage::LobbyLeft { lobby_id }).await?;
                }
                self.broadcaster.deliver(deliveries).await;
                Ok(())
            }
            ClientMessage::StartGame { lobby_id } => {
                let deliveries = self.registry.set_ready(identity.player_id, lobby_id, true).await;
                self.broadcaster.deliver(deliveries).await;
                Ok(())
            }
            ClientMessage::CancelGame { lobby_id } => {
                let deliveries = self.registry.set_ready(identity.player_id, lobby_id, false).await;
                self.broadcaster.deliver(deliveries).await;
                Ok(())
            }
            // Handled before routing.
            ClientMessage::Login { .. } | ClientMessage::Register { .. } => Ok(()),
        }
    }
}

impl From<crate::network::registry::JoinError> for crate::network::protocol::JoinFailReason {
    fn from(e: crate::network::registry::JoinError) -> Self {
        use crate::network::protocol::JoinFailReason;
        use crate::network::registry::JoinError;
        match e {
            JoinError::NotFound => JoinFailReason::NotFound,
            JoinError::Full => JoinFailReason::Full,
            JoinError::WrongPassword => JoinFailReason::WrongPassword,
        }
    }
}
