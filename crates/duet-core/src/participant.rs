//! Participant entity and its call status.

use crate::{ConnectionId, DisplayName, DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Participant Status (2-State Model)
// ============================================================================

/// Call status of a registered participant.
///
/// The peer handle lives inside `InCall`, so a participant can never be in
/// a call without knowing who with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipantStatus {
    /// Connected and eligible for pairing.
    #[default]
    Available,

    /// Paired with `peer`; the two reference each other.
    InCall {
        /// Connection handle of the other party
        peer: ConnectionId,
    },
}

impl ParticipantStatus {
    /// Returns the peer handle when in a call.
    pub fn peer(&self) -> Option<ConnectionId> {
        match self {
            Self::Available => None,
            Self::InCall { peer } => Some(*peer),
        }
    }

    /// Returns the tag without the peer payload.
    pub fn presence(&self) -> PresenceState {
        match self {
            Self::Available => PresenceState::Available,
            Self::InCall { .. } => PresenceState::InCall,
        }
    }
}

/// Payload-free status tag used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceState {
    Available,
    InCall,
}

impl PresenceState {
    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InCall => "in-call",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Participant
// ============================================================================

/// A registered client identity bound to one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Connection this participant is bound to
    pub id: ConnectionId,

    /// Unique display name
    pub name: DisplayName,

    /// Current call status
    pub status: ParticipantStatus,

    /// When the participant registered
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Creates a new, available participant.
    pub fn new(id: ConnectionId, name: DisplayName) -> Self {
        Self {
            id,
            name,
            status: ParticipantStatus::Available,
            joined_at: Utc::now(),
        }
    }

    /// Returns true if the participant can be paired.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.status, ParticipantStatus::Available)
    }

    /// Returns the current peer, if any.
    pub fn peer(&self) -> Option<ConnectionId> {
        self.status.peer()
    }

    /// Time since registration, clamped at zero.
    pub fn connected_for(&self) -> chrono::Duration {
        (Utc::now() - self.joined_at).max(chrono::Duration::zero())
    }

    /// Moves `Available -> InCall { peer }`.
    ///
    /// # Errors
    /// - `DomainError::SelfPairing` if `peer` is this participant
    /// - `DomainError::AlreadyInCall` if the participant already has a peer
    pub fn begin_call(&mut self, peer: ConnectionId) -> DomainResult<()> {
        if peer == self.id {
            return Err(DomainError::SelfPairing(self.id));
        }
        if let ParticipantStatus::InCall { peer: current } = self.status {
            return Err(DomainError::AlreadyInCall {
                connection: self.id,
                peer: current,
            });
        }
        self.status = ParticipantStatus::InCall { peer };
        Ok(())
    }

    /// Moves back to `Available`, returning the previous peer.
    ///
    /// Ending a call that was never started is a no-op returning `None`.
    pub fn end_call(&mut self) -> Option<ConnectionId> {
        let previous = self.status.peer();
        self.status = ParticipantStatus::Available;
        previous
    }
}

// ============================================================================
// Roster View
// ============================================================================

/// Roster row as published in `user-list` snapshots.
///
/// `id` and `peer` are display names, not connection handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: String,
    pub status: PresenceState,
    pub peer: Option<String>,
}

impl ParticipantView {
    /// Builds a view; `peer_name` is resolved by the caller from the registry.
    pub fn new(participant: &Participant, peer_name: Option<&DisplayName>) -> Self {
        Self {
            id: participant.name.to_string(),
            status: participant.status.presence(),
            peer: peer_name.map(|n| n.to_string()),
        }
    }
}
