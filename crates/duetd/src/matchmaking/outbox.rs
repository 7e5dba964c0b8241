//! Per-connection outbound queue used for best-effort notifications.
//!
//! The matchmaking service never waits on a client: every notification is a
//! non-blocking `try_send` into the connection's bounded queue. No
//! acknowledgment is awaited and nothing is retried.
//!
//! A closed queue means the connection is already going away, so the message
//! is dropped. A full queue means the client has fallen behind and may have
//! missed a notification it cannot recover from (a pairing or a call end),
//! so the outbox is marked overflowed. The connection handler watches for
//! that and ends the connection, and disconnect handling then reconciles
//! the registry and the pool.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use duet_core::ConnectionId;
use duet_protocol::ServerMessage;

/// Item delivered to a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send to the client.
    Message(ServerMessage),

    /// Flush what is queued, then close the connection.
    Close,
}

/// Sending side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    connection: ConnectionId,
    sender: mpsc::Sender<Outbound>,

    /// Cancelled the first time a push finds the queue full
    overflow: CancellationToken,
}

impl Outbox {
    /// Creates an outbox and the receiver its connection writer drains.
    pub fn channel(connection: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            connection,
            sender,
            overflow: CancellationToken::new(),
        };
        (outbox, receiver)
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Best-effort send. Returns false if the message was dropped.
    pub fn notify(&self, msg: ServerMessage) -> bool {
        self.push(Outbound::Message(msg))
    }

    /// Asks the writer to close the connection after draining.
    pub fn close(&self) -> bool {
        self.push(Outbound::Close)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// True once a message was dropped because the queue was full.
    pub fn is_overflowed(&self) -> bool {
        self.overflow.is_cancelled()
    }

    /// Completes once the queue has overflowed.
    pub async fn overflowed(&self) {
        self.overflow.cancelled().await
    }

    fn push(&self, item: Outbound) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.overflow.is_cancelled() {
                    warn!(connection = %self.connection, "Outbox full, cutting connection");
                    self.overflow.cancel();
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %self.connection, "Outbox closed, dropping message");
                false
            }
        }
    }
}
