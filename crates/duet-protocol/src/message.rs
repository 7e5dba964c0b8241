//! Protocol message types for signaling connections.

use crate::version::ProtocolVersion;
use duet_core::{ConnectionId, DisplayName, ParticipantView};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Client -> Server
// ============================================================================

/// Requests a client can send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    /// Claim a display name and join the waiting pool
    Register {
        /// Requested display name (validated server-side)
        display_name: String,
    },

    /// Session-description offer for the current peer
    Offer {
        /// Connection handle of the peer
        target: ConnectionId,
        /// Opaque session description
        sdp: serde_json::Value,
    },

    /// Session-description answer for the current peer
    Answer {
        /// Connection handle of the peer
        target: ConnectionId,
        /// Opaque session description
        sdp: serde_json::Value,
    },

    /// Network-path candidate for the current peer
    IceCandidate {
        /// Connection handle of the peer
        target: ConnectionId,
        /// Opaque candidate descriptor
        candidate: serde_json::Value,
    },

    /// Leave the current call but stay connected for a new partner
    EndCall,

    /// Leave entirely; the server closes the connection
    EndRoom,

    /// Request a roster snapshot for this connection only
    ListParticipants,

    /// Application-level liveness check
    Ping {
        /// Sequence number echoed in the pong
        seq: u64,
    },
}

impl ClientRequest {
    /// Splits a relayable request into `(kind, target, payload)`.
    ///
    /// Returns the request unchanged if it is not one of the three
    /// handshake kinds.
    pub fn into_relay(self) -> Result<(RelayKind, ConnectionId, serde_json::Value), Self> {
        match self {
            Self::Offer { target, sdp } => Ok((RelayKind::Offer, target, sdp)),
            Self::Answer { target, sdp } => Ok((RelayKind::Answer, target, sdp)),
            Self::IceCandidate { target, candidate } => {
                Ok((RelayKind::IceCandidate, target, candidate))
            }
            other => Err(other),
        }
    }

    /// Returns the wire name of this request, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::EndCall => "end-call",
            Self::EndRoom => "end-room",
            Self::ListParticipants => "list-participants",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Envelope for every client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version; assumed current when omitted
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub request: ClientRequest,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(request: ClientRequest) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request,
        }
    }

    /// Creates a register message.
    pub fn register(display_name: impl Into<String>) -> Self {
        Self::new(ClientRequest::Register {
            display_name: display_name.into(),
        })
    }

    /// Creates a relayed handshake message of the given kind.
    pub fn relay(kind: RelayKind, target: ConnectionId, payload: serde_json::Value) -> Self {
        let request = match kind {
            RelayKind::Offer => ClientRequest::Offer {
                target,
                sdp: payload,
            },
            RelayKind::Answer => ClientRequest::Answer {
                target,
                sdp: payload,
            },
            RelayKind::IceCandidate => ClientRequest::IceCandidate {
                target,
                candidate: payload,
            },
        };
        Self::new(request)
    }

    /// Creates an end-call message.
    pub fn end_call() -> Self {
        Self::new(ClientRequest::EndCall)
    }

    /// Creates an end-room message.
    pub fn end_room() -> Self {
        Self::new(ClientRequest::EndRoom)
    }

    /// Creates a list-participants message.
    pub fn list_participants() -> Self {
        Self::new(ClientRequest::ListParticipants)
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(ClientRequest::Ping { seq })
    }
}

// ============================================================================
// Relay Kinds
// ============================================================================

/// The three handshake payload kinds the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        };
        f.write_str(name)
    }
}

/// Why the surviving participant's call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallEndReason {
    /// The peer sent `end-call` and is looking for a new partner.
    PeerEndedCall,

    /// The peer's connection closed (network loss, tab closed, `end-room`).
    PeerDisconnected,
}

impl fmt::Display for CallEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerEndedCall => write!(f, "peer ended the call"),
            Self::PeerDisconnected => write!(f, "peer disconnected"),
        }
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Connection accepted; tells the client its own handle
    Connected {
        /// Server's protocol version
        protocol_version: ProtocolVersion,
        /// Handle assigned to this connection
        connection_id: ConnectionId,
    },

    /// Connection refused (version mismatch, server full)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Server's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Human-readable, informational notice
    Status { message: String },

    /// Paired; this side creates the offer
    CallInitiated {
        peer_name: DisplayName,
        peer_id: ConnectionId,
    },

    /// Paired; this side waits for the offer and answers it
    CallIncoming {
        peer_name: DisplayName,
        peer_id: ConnectionId,
    },

    /// Relayed session-description offer
    Offer {
        sender: ConnectionId,
        sdp: serde_json::Value,
    },

    /// Relayed session-description answer
    Answer {
        sender: ConnectionId,
        sdp: serde_json::Value,
    },

    /// Relayed network-path candidate
    IceCandidate {
        sender: ConnectionId,
        candidate: serde_json::Value,
    },

    /// The other side of the call is gone
    CallEndedByPeer { reason: CallEndReason },

    /// Roster snapshot of every live participant
    UserList { users: Vec<ParticipantView> },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response; the connection stays open
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    /// Creates a connected response.
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a status notice.
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    /// Creates the notice for the offer-initiating side of a new pair.
    pub fn call_initiated(peer_name: DisplayName, peer_id: ConnectionId) -> Self {
        Self::CallInitiated { peer_name, peer_id }
    }

    /// Creates the notice for the answering side of a new pair.
    pub fn call_incoming(peer_name: DisplayName, peer_id: ConnectionId) -> Self {
        Self::CallIncoming { peer_name, peer_id }
    }

    /// Wraps a relayed payload, stamping the sender's handle.
    pub fn relayed(kind: RelayKind, sender: ConnectionId, payload: serde_json::Value) -> Self {
        match kind {
            RelayKind::Offer => Self::Offer {
                sender,
                sdp: payload,
            },
            RelayKind::Answer => Self::Answer {
                sender,
                sdp: payload,
            },
            RelayKind::IceCandidate => Self::IceCandidate {
                sender,
                candidate: payload,
            },
        }
    }

    /// Creates a call-ended notice for the surviving peer.
    pub fn call_ended_by_peer(reason: CallEndReason) -> Self {
        Self::CallEndedByPeer { reason }
    }

    /// Creates a roster snapshot.
    pub fn user_list(users: Vec<ParticipantView>) -> Self {
        Self::UserList { users }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}
