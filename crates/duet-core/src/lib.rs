//! Duet Core - Shared domain types for call matchmaking
//!
//! This crate provides the domain types shared between the wire protocol
//! (duet-protocol) and the daemon (duetd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod identity;
pub mod participant;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use identity::{ConnectionId, DisplayName, MAX_DISPLAY_NAME_CHARS};
pub use participant::{Participant, ParticipantStatus, ParticipantView, PresenceState};
