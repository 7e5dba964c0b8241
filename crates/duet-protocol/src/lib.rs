//! Duet Protocol - Wire protocol for signaling connections
//!
//! This crate provides the message types exchanged between browser clients
//! and the duetd signaling server, plus the text-frame codec.
//!
//! Every message is one JSON object per WebSocket text frame, tagged by a
//! kebab-case `type` field:
//!
//! ```json
//! {"type": "register", "display_name": "alice"}
//! {"type": "call-initiated", "peer_name": "bob", "peer_id": "<uuid>"}
//! {"type": "offer", "target": "<uuid>", "sdp": {"type": "offer", "sdp": "..."}}
//! ```

pub mod codec;
pub mod message;
pub mod version;

pub use codec::{decode_client, decode_server, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use message::{CallEndReason, ClientMessage, ClientRequest, RelayKind, ServerMessage};
pub use version::{ProtocolVersion, VersionError};
