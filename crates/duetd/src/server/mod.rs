//! WebSocket signaling server.
//!
//! The server:
//! - Listens on TCP and upgrades each connection to WebSocket
//! - Answers plain HTTP `GET` requests with a health response
//! - Spawns a ConnectionHandler per client, bounded by `max_connections`
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ SignalingServer  │
//! │                  │
//! │   TcpListener    │
//! └────────┬─────────┘
//!          │ accept()
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│ MatchmakerHandle │
//! │   (per client)   │     │                  │
//! └──────────────────┘     └──────────────────┘
//!          ▲                        │
//!          │ Outbox (mpsc)          │
//!          └────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop keeps accepting

mod connection;
mod health;

pub use connection::{
    reject_connection, ConnectionError, ConnectionHandler, ConnectionSettings, END_ROOM_NOTICE,
};
pub use health::HEALTH_BODY;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::matchmaking::MatchmakerHandle;

/// Time connection handlers get to close after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Reason sent to connections over the limit.
pub const SERVER_FULL_REASON: &str = "Server is at connection capacity";

/// WebSocket server in front of the matchmaker.
pub struct SignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,

    /// Handle to the matchmaking service
    matchmaker: MatchmakerHandle,

    settings: ConnectionSettings,
    max_connections: usize,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Open connections, decremented by `ConnectionGuard`
    active: Arc<AtomicUsize>,

    tasks: TaskTracker,
}

impl SignalingServer {
    /// Binds the listener described by `config.server.bind`.
    ///
    /// Binding to port 0 picks a free port; see `local_addr`.
    pub async fn bind(
        config: &DaemonConfig,
        matchmaker: MatchmakerHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.server.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            local_addr,
            matchmaker,
            settings: ConnectionSettings::from_config(config),
            max_connections: config.server.max_connections,
            cancel_token,
            active: Arc::new(AtomicUsize::new(0)),
            tasks: TaskTracker::new(),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits (bounded) for open connections to close.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Signaling server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                open = self.connection_count(),
                "Connections still open after shutdown grace period"
            );
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Spawns a handler task for a new connection, or rejects it if the
    /// server is at capacity.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let settings = self.settings;

        let Some(guard) = ConnectionGuard::acquire(&self.active, self.max_connections) else {
            warn!(
                peer_addr = %addr,
                max = self.max_connections,
                "Connection limit reached, rejecting"
            );
            self.tasks.spawn(async move {
                if let Err(e) = reject_connection(stream, SERVER_FULL_REASON, settings).await {
                    debug!(peer_addr = %addr, error = %e, "Failed to reject connection");
                }
            });
            return;
        };

        let handler = ConnectionHandler::new(
            self.matchmaker.clone(),
            settings,
            self.cancel_token.child_token(),
        );
        debug!(peer_addr = %addr, connection = %handler.connection(), "New connection");

        self.tasks.spawn(async move {
            let _guard = guard;
            if let Err(e) = handler.run(stream).await {
                if e.is_client_side() {
                    debug!(peer_addr = %addr, error = %e, "Connection ended");
                } else {
                    warn!(peer_addr = %addr, error = %e, "Connection failed");
                }
            }
        });
    }
}

/// Counts an open connection until dropped.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
