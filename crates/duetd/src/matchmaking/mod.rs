//! Matchmaking service using the Actor pattern.
//!
//! The matchmaker is the single owner of the participant registry and the
//! waiting pool. Every client event (register, relay, end-call, disconnect)
//! arrives as a command on an mpsc channel and is applied to completion
//! before the next one, so the matchmaker never observes a half-applied
//! event.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ ConnectionHandler│────▶│ MatchmakerActor  │────▶│ Broadcast Channel│
//! └──────────────────┘     └──────────────────┘     └──────────────────┘
//!         │                        │                        │
//!         │   MatchCommand         │   Outbox (per conn)    │   MatchEvent
//!         │   (mpsc channel)       │   try_send, cut-full   │   (broadcast)
//!         ▼                        ▼                        ▼
//!    register / relay /       registry + pool          observers
//!    end-call / disconnect    + notifications
//! ```
//!
//! Roster snapshots travel on their own `watch` channel, so every client
//! sees only the latest roster and snapshots never take outbox slots from
//! pairing or relay notifications.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;
mod outbox;
mod pool;
mod registry;
mod state;

pub use actor::{MatchmakerActor, DEFAULT_MAX_PARTICIPANTS};
pub use commands::{MatchCommand, MatchError, MatchEvent, RosterSnapshot};
pub use handle::MatchmakerHandle;
pub use outbox::{Outbound, Outbox};
pub use pool::WaitingPool;
pub use registry::ParticipantRegistry;
pub use state::{MatchState, CONNECTED_NOTICE, NOT_IN_CALL_NOTICE, WAITING_NOTICE};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the matchmaker actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use duetd::matchmaking::spawn_matchmaker;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_matchmaker(1000);
///     let roster = handle.roster().await;
///     assert!(roster.is_empty());
/// }
/// ```
pub fn spawn_matchmaker(max_participants: usize) -> MatchmakerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = MatchmakerActor::new(cmd_rx, event_tx.clone(), max_participants);
    let roster = actor.roster_feed();
    tokio::spawn(actor.run());

    MatchmakerHandle::new(cmd_tx, event_tx, roster)
}
