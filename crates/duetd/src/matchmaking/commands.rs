//! Matchmaker actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `MatchmakerActor`:
//! - `MatchCommand`: Commands sent to the actor, one per client event
//! - `MatchError`: Errors that can occur during matchmaking operations
//! - `MatchEvent`: Events published by the actor for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use duet_core::{ConnectionId, DisplayName, DomainError, Participant, ParticipantView};
use duet_protocol::{CallEndReason, RelayKind};

use super::outbox::Outbox;

/// Shared roster snapshot, ordered by registration time.
pub type RosterSnapshot = Arc<Vec<ParticipantView>>;

// ============================================================================
// Matchmaker Commands
// ============================================================================

/// Commands sent to the matchmaker actor.
///
/// The actor processes them strictly one at a time, so each command is an
/// atomic unit against the registry and waiting pool.
#[derive(Debug)]
pub enum MatchCommand {
    /// A transport connection was accepted; route notifications to `outbox`.
    Attach { outbox: Outbox },

    /// Claim a display name and enter the waiting pool.
    ///
    /// # Errors
    /// - `MatchError::InvalidName` if the name fails validation
    /// - `MatchError::DuplicateName` if a live participant holds the name
    /// - `MatchError::RegistryFull` if at maximum capacity
    /// - `MatchError::AlreadyRegistered` if this connection already registered
    Register {
        connection: ConnectionId,
        display_name: String,
        respond_to: oneshot::Sender<Result<DisplayName, MatchError>>,
    },

    /// Forward a handshake payload to the sender's current peer.
    ///
    /// Fire-and-forget: stale targets are dropped silently.
    Relay {
        kind: RelayKind,
        sender: ConnectionId,
        target: ConnectionId,
        payload: serde_json::Value,
    },

    /// Leave the current call and re-enter the pool.
    ///
    /// Responds with the former peer's handle.
    ///
    /// # Errors
    /// - `MatchError::NotRegistered` if the connection never registered
    /// - `MatchError::NotInCall` if the participant is Available
    EndCall {
        connection: ConnectionId,
        respond_to: oneshot::Sender<Result<ConnectionId, MatchError>>,
    },

    /// The connection closed. Idempotent.
    ///
    /// Responds `true` if a registered participant was removed.
    Disconnect {
        connection: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Send a roster snapshot to one connection.
    SendRoster { connection: ConnectionId },

    /// Get a single participant by handle.
    Lookup {
        connection: ConnectionId,
        respond_to: oneshot::Sender<Option<Participant>>,
    },

    /// Get the roster snapshot.
    Roster {
        respond_to: oneshot::Sender<Vec<ParticipantView>>,
    },

    /// Get the waiting pool in FIFO order.
    Waiting {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },
}

// ============================================================================
// Matchmaking Errors
// ============================================================================

/// Errors that can occur during matchmaking operations.
///
/// None of these is fatal; each is reported to the requesting client as a
/// status notice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The requested display name failed validation.
    #[error("invalid display name: {0}")]
    InvalidName(#[from] DomainError),

    /// A live participant already holds the display name.
    #[error("display name \"{0}\" is already taken")]
    DuplicateName(DisplayName),

    /// The registry has reached its maximum participant capacity.
    #[error("server is full (max: {max} participants)")]
    RegistryFull { max: usize },

    /// The connection has already registered a participant.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    /// The connection has not registered.
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),

    /// End-call was requested by a participant that is not in a call.
    #[error("connection {0} is not in a call")]
    NotInCall(ConnectionId),

    /// Pairing precondition failed: the participant is already in a call.
    #[error("connection {0} is not available for pairing")]
    NotAvailable(ConnectionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl MatchError {
    /// Returns true for rejections that end the requesting connection.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::InvalidName(_) | Self::DuplicateName(_) | Self::RegistryFull { .. }
        )
    }
}

// ============================================================================
// Match Events
// ============================================================================

/// Events published by the matchmaker to subscribers.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    /// A participant registered and entered the waiting pool.
    Registered {
        connection: ConnectionId,
        name: DisplayName,
    },

    /// Two participants were paired.
    Paired {
        /// Told `call-initiated`; creates the offer
        initiator: ConnectionId,
        /// Told `call-incoming`; answers
        responder: ConnectionId,
    },

    /// A call ended and `survivor` went back to the pool.
    CallEnded {
        survivor: ConnectionId,
        peer: ConnectionId,
        reason: CallEndReason,
    },

    /// A registered participant's connection closed.
    Departed {
        connection: ConnectionId,
        name: DisplayName,
    },

    /// Roster snapshot after a state change (shared, cheap to clone).
    RosterUpdated { roster: RosterSnapshot },
}
