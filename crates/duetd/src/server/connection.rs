//! Connection handler for individual WebSocket clients.
//!
//! Each accepted TCP connection gets its own `ConnectionHandler` that:
//! - Answers plain HTTP health checks without upgrading
//! - Upgrades the stream to WebSocket and assigns a `ConnectionId`
//! - Attaches the connection's outbox to the matchmaker
//! - Decodes client frames and routes requests to the matchmaker
//! - Drains the outbox onto the socket, bounded by a write timeout
//! - Forwards the latest roster snapshot when roster broadcast is on
//! - Sends heartbeat pings and closes idle connections
//! - Ends the connection when its outbox overflows
//! - Reports the disconnect exactly once when the loop ends
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Decode errors are answered with an `error` message; the connection stays
//! - Transport errors end the connection and run disconnect handling

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duet_core::ConnectionId;
use duet_protocol::{
    decode_client, encode, ClientMessage, ClientRequest, ProtocolError, ProtocolVersion,
    ServerMessage,
};

use crate::config::DaemonConfig;
use super::health;
use crate::matchmaking::{MatchError, MatchmakerHandle, Outbound, Outbox, RosterSnapshot};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Time allowed for the WebSocket upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Notice sent before closing on `end-room`.
pub const END_ROOM_NOTICE: &str = "Room ended. Goodbye.";

/// Per-connection transport settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbox_capacity: usize,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Forward roster snapshots published by the matchmaker
    pub broadcast_roster: bool,
}

impl ConnectionSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            outbox_capacity: config.server.outbox_capacity,
            max_message_size: config.server.max_message_size,
            heartbeat_interval: config.server.heartbeat_interval(),
            idle_timeout: config.server.idle_timeout(),
            write_timeout: config.server.write_timeout(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            broadcast_roster: config.matchmaking.broadcast_roster,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

/// What the read loop does after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Flush queued messages, then close.
    Close,
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    connection: ConnectionId,
    matchmaker: MatchmakerHandle,
    settings: ConnectionSettings,
    cancel_token: CancellationToken,

    /// Set once `register` succeeds
    registered: bool,
}

impl ConnectionHandler {
    /// Creates a handler with a freshly assigned connection handle.
    pub fn new(
        matchmaker: MatchmakerHandle,
        settings: ConnectionSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            connection: ConnectionId::new(),
            matchmaker,
            settings,
            cancel_token,
            registered: false,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Runs the connection to completion.
    ///
    /// Disconnect handling runs whenever the upgrade succeeded, regardless
    /// of how the loop ended.
    pub async fn run(mut self, mut stream: TcpStream) -> Result<(), ConnectionError> {
        if answer_health_check(&mut stream, &self.settings).await? {
            debug!(connection = %self.connection, "Served health check");
            return Ok(());
        }

        let ws = timeout(
            self.settings.handshake_timeout,
            tokio_tungstenite::accept_async(stream),
        )
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)?
        .map_err(ConnectionError::Handshake)?;

        let (mut sink, mut stream) = ws.split();
        let (outbox, mut outbox_rx) =
            Outbox::channel(self.connection, self.settings.outbox_capacity);

        debug!(connection = %self.connection, "WebSocket connection accepted");

        let result = match self.matchmaker.attach(outbox.clone()).await {
            Ok(()) => {
                outbox.notify(ServerMessage::connected(self.connection));
                self.process(&mut sink, &mut stream, &outbox, &mut outbox_rx)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        let removed = self.matchmaker.disconnect(self.connection).await;
        let _ = timeout(self.settings.write_timeout, sink.close()).await;

        match &result {
            Ok(()) => info!(connection = %self.connection, removed, "Client disconnected"),
            Err(e) => info!(
                connection = %self.connection,
                removed,
                error = %e,
                "Client connection ended"
            ),
        }
        result
    }

    /// Main loop: inbound frames, outbox drain, roster updates, heartbeat.
    async fn process(
        &mut self,
        sink: &mut WsSink,
        stream: &mut WsStream,
        outbox: &Outbox,
        outbox_rx: &mut mpsc::Receiver<Outbound>,
    ) -> Result<(), ConnectionError> {
        let mut roster_rx = self
            .settings
            .broadcast_roster
            .then(|| self.matchmaker.roster_updates());

        let period = self.settings.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(connection = %self.connection, "Closing connection for shutdown");
                    return self.flush_and_close(sink, outbox_rx).await;
                }

                _ = outbox.overflowed() => {
                    return Err(ConnectionError::Overflow(self.settings.outbox_capacity));
                }

                frame = stream.next() => {
                    let frame = match frame {
                        None => return Ok(()),
                        Some(frame) => frame?,
                    };
                    last_seen = Instant::now();

                    if self.handle_frame(frame, outbox).await? == Flow::Close {
                        return self.flush_and_close(sink, outbox_rx).await;
                    }
                }

                item = outbox_rx.recv() => match item {
                    Some(Outbound::Message(msg)) => self.write(sink, &msg).await?,
                    Some(Outbound::Close) | None => {
                        return self.flush_and_close(sink, outbox_rx).await;
                    }
                },

                roster = next_roster(&mut roster_rx) => match roster {
                    Some(roster) => {
                        let msg = ServerMessage::user_list(roster.as_ref().clone());
                        self.write(sink, &msg).await?;
                    }
                    None => roster_rx = None,
                },

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= self.settings.idle_timeout {
                        return Err(ConnectionError::IdleTimeout(self.settings.idle_timeout));
                    }
                    self.send_frame(sink, Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    /// Handles one inbound WebSocket frame.
    async fn handle_frame(
        &mut self,
        frame: Message,
        outbox: &Outbox,
    ) -> Result<Flow, ConnectionError> {
        match frame {
            Message::Text(text) => self.handle_text(text.as_str(), outbox).await,
            Message::Binary(_) => {
                outbox.notify(ServerMessage::error_with_code(
                    "Binary frames are not supported",
                    "unsupported-frame",
                ));
                Ok(Flow::Continue)
            }
            Message::Close(_) => Ok(Flow::Close),
            // Pings are answered by tungstenite; pongs only refresh liveness
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Flow::Continue),
        }
    }

    /// Decodes one client message and dispatches it.
    async fn handle_text(&mut self, text: &str, outbox: &Outbox) -> Result<Flow, ConnectionError> {
        let msg = match decode_client(text, self.settings.max_message_size) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection = %self.connection, error = %e, "Undecodable client message");
                outbox.notify(ServerMessage::error_with_code(e.to_string(), e.code()));
                return Ok(Flow::Continue);
            }
        };

        let version = ProtocolVersion::check_client(msg.protocol_version, ProtocolVersion::CURRENT);
        if let Err(e) = version {
            warn!(
                connection = %self.connection,
                client_version = %msg.protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            outbox.notify(ServerMessage::rejected(e.to_string()));
            return Ok(Flow::Close);
        }

        self.handle_request(msg, outbox).await
    }

    async fn handle_request(
        &mut self,
        msg: ClientMessage,
        outbox: &Outbox,
    ) -> Result<Flow, ConnectionError> {
        debug!(
            connection = %self.connection,
            kind = msg.request.kind(),
            "Client request"
        );

        let request = match msg.request.into_relay() {
            Ok((kind, target, payload)) => {
                self.matchmaker
                    .relay(kind, self.connection, target, payload)
                    .await?;
                return Ok(Flow::Continue);
            }
            Err(request) => request,
        };

        match request {
            ClientRequest::Register { display_name } => {
                match self.matchmaker.register(self.connection, display_name).await {
                    Ok(name) => {
                        self.registered = true;
                        info!(connection = %self.connection, name = %name, "Client registered");
                        Ok(Flow::Continue)
                    }
                    Err(MatchError::ChannelClosed) => Err(MatchError::ChannelClosed.into()),
                    // The matchmaker already sent the status notice
                    Err(e) if e.closes_connection() => Ok(Flow::Close),
                    Err(_) => Ok(Flow::Continue),
                }
            }
            ClientRequest::EndCall => match self.matchmaker.end_call(self.connection).await {
                Err(MatchError::ChannelClosed) => Err(MatchError::ChannelClosed.into()),
                _ => Ok(Flow::Continue),
            },
            ClientRequest::EndRoom => {
                info!(
                    connection = %self.connection,
                    registered = self.registered,
                    "Client ended the room"
                );
                outbox.notify(ServerMessage::status(END_ROOM_NOTICE));
                Ok(Flow::Close)
            }
            ClientRequest::ListParticipants => {
                self.matchmaker.send_roster(self.connection).await?;
                Ok(Flow::Continue)
            }
            ClientRequest::Ping { seq } => {
                outbox.notify(ServerMessage::pong(seq));
                Ok(Flow::Continue)
            }
            ClientRequest::Offer { .. }
            | ClientRequest::Answer { .. }
            | ClientRequest::IceCandidate { .. } => Ok(Flow::Continue),
        }
    }

    /// Writes whatever is already queued, then sends a close frame.
    async fn flush_and_close(
        &self,
        sink: &mut WsSink,
        outbox_rx: &mut mpsc::Receiver<Outbound>,
    ) -> Result<(), ConnectionError> {
        while let Ok(item) = outbox_rx.try_recv() {
            match item {
                Outbound::Message(msg) => self.write(sink, &msg).await?,
                Outbound::Close => break,
            }
        }
        self.send_frame(sink, Message::Close(None)).await
    }

    async fn write(&self, sink: &mut WsSink, msg: &ServerMessage) -> Result<(), ConnectionError> {
        let json = encode(msg)?;
        self.send_frame(sink, Message::Text(json.into())).await
    }

    async fn send_frame(&self, sink: &mut WsSink, frame: Message) -> Result<(), ConnectionError> {
        timeout(self.settings.write_timeout, sink.send(frame))
            .await
            .map_err(|_| ConnectionError::WriteTimeout(self.settings.write_timeout))??;
        Ok(())
    }
}

/// Next roster snapshot from an optional watch; pending forever when absent.
///
/// Returns `None` once the matchmaker is gone.
async fn next_roster(
    rx: &mut Option<watch::Receiver<RosterSnapshot>>,
) -> Option<RosterSnapshot> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(Arc::clone(&rx.borrow_and_update())),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Serves a plain HTTP health check; true if the connection was consumed.
async fn answer_health_check(
    stream: &mut TcpStream,
    settings: &ConnectionSettings,
) -> Result<bool, ConnectionError> {
    timeout(settings.handshake_timeout, health::serve_plain_http(stream))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)?
        .map_err(|e| ConnectionError::Handshake(tungstenite::Error::Io(e)))
}

/// Accepts the upgrade only to tell the client the server is full.
///
/// Health checks are still answered at capacity.
pub async fn reject_connection(
    mut stream: TcpStream,
    reason: &str,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError> {
    if answer_health_check(&mut stream, &settings).await? {
        return Ok(());
    }

    let mut ws = timeout(
        settings.handshake_timeout,
        tokio_tungstenite::accept_async(stream),
    )
    .await
    .map_err(|_| ConnectionError::HandshakeTimeout)?
    .map_err(ConnectionError::Handshake)?;

    let json = encode(&ServerMessage::rejected(reason))?;
    timeout(settings.write_timeout, async {
        ws.send(Message::Text(json.into())).await?;
        ws.close(None).await
    })
    .await
    .map_err(|_| ConnectionError::WriteTimeout(settings.write_timeout))??;
    Ok(())
}

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("No traffic for {0:?}")]
    IdleTimeout(Duration),

    #[error("Outbound queue overflowed (capacity {0})")]
    Overflow(usize),

    #[error("Matchmaker unavailable: {0}")]
    Matchmaker(#[from] MatchError),
}

impl ConnectionError {
    /// Returns true for errors that are a normal part of client churn.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            Self::Handshake(_)
                | Self::HandshakeTimeout
                | Self::WebSocket(
                    tungstenite::Error::ConnectionClosed
                        | tungstenite::Error::AlreadyClosed
                        | tungstenite::Error::Protocol(_)
                        | tungstenite::Error::Io(_)
                )
                | Self::IdleTimeout(_)
                | Self::Overflow(_)
        )
    }
}
