//! Domain-specific error types following panic-free policy.

use crate::ConnectionId;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Display name is empty after trimming
    #[error("Display name must not be empty")]
    EmptyDisplayName,

    /// Display name exceeds the length limit
    #[error("Display name is too long: {length} characters (max: {max})")]
    DisplayNameTooLong { length: usize, max: usize },

    /// Pairing was attempted on a participant that is already in a call
    #[error("Participant {connection} is already in a call with {peer}")]
    AlreadyInCall {
        connection: ConnectionId,
        peer: ConnectionId,
    },

    /// A participant cannot be paired with itself
    #[error("Participant {0} cannot be paired with itself")]
    SelfPairing(ConnectionId),

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
