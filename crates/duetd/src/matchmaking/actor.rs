//! Matchmaker actor - owns the matchmaking state and processes commands.
//!
//! The MatchmakerActor is the single owner of registry, waiting pool and
//! outboxes. It receives commands via an mpsc channel, applies each one to
//! `MatchState` to completion, and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the requester gave up waiting)

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use super::commands::{MatchCommand, MatchEvent, RosterSnapshot};
use super::state::MatchState;

// ============================================================================
// Resource Limits
// ============================================================================

/// Default maximum number of registered participants.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 1000;

// ============================================================================
// Matchmaker Actor
// ============================================================================

/// The matchmaker actor.
///
/// Commands are processed sequentially in arrival order; no two client
/// events ever interleave against the registry or pool.
pub struct MatchmakerActor {
    /// Command receiver
    receiver: mpsc::Receiver<MatchCommand>,

    state: MatchState,
}

impl MatchmakerActor {
    /// Creates a new matchmaker actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_participants` - Registry capacity
    pub fn new(
        receiver: mpsc::Receiver<MatchCommand>,
        event_publisher: broadcast::Sender<MatchEvent>,
        max_participants: usize,
    ) -> Self {
        Self {
            receiver,
            state: MatchState::new(max_participants, event_publisher),
        }
    }

    /// Returns a receiver for the latest roster snapshot.
    pub fn roster_feed(&self) -> watch::Receiver<RosterSnapshot> {
        self.state.roster_feed()
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!("Matchmaker actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            participants = self.state.participant_count(),
            connections = self.state.connection_count(),
            "Matchmaker actor stopped"
        );
    }

    /// Dispatches a command to the state machine.
    fn handle_command(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::Attach { outbox } => {
                self.state.attach(outbox);
            }
            MatchCommand::Register {
                connection,
                display_name,
                respond_to,
            } => {
                let result = self.state.register(connection, &display_name);
                // Ignore send error - the connection may be gone already
                let _ = respond_to.send(result);
            }
            MatchCommand::Relay {
                kind,
                sender,
                target,
                payload,
            } => {
                self.state.relay(kind, sender, target, payload);
            }
            MatchCommand::EndCall {
                connection,
                respond_to,
            } => {
                let result = self.state.end_call(connection);
                let _ = respond_to.send(result);
            }
            MatchCommand::Disconnect {
                connection,
                respond_to,
            } => {
                let removed = self.state.disconnect(connection);
                let _ = respond_to.send(removed);
            }
            MatchCommand::SendRoster { connection } => {
                self.state.send_roster(connection);
            }
            MatchCommand::Lookup {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.state.lookup(&connection));
            }
            MatchCommand::Roster { respond_to } => {
                let _ = respond_to.send(self.state.roster());
            }
            MatchCommand::Waiting { respond_to } => {
                let _ = respond_to.send(self.state.waiting());
            }
        }
        debug!(
            participants = self.state.participant_count(),
            connections = self.state.connection_count(),
            "Command processed"
        );
    }
}
