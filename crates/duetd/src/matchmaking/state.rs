//! Matchmaking state machine - registry, waiting pool and notifications.
//!
//! `MatchState` holds every piece of shared mutable state in the daemon.
//! It is owned by the `MatchmakerActor` and only ever touched from that one
//! task, which is what makes each command atomic. Methods here are plain
//! synchronous functions so the pairing rules can be tested without a
//! runtime.
//!
//! # Invariants (hold after every public method returns)
//!
//! - Every pool entry is registered and Available; no entry appears twice.
//! - Every Available participant is in the pool.
//! - InCall participants reference each other symmetrically.
//! - Display names are unique among registered participants.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use duet_core::{ConnectionId, DisplayName, Participant, ParticipantView};
use duet_protocol::{CallEndReason, RelayKind, ServerMessage};

use super::commands::{MatchError, MatchEvent, RosterSnapshot};
use super::outbox::Outbox;
use super::pool::WaitingPool;
use super::registry::ParticipantRegistry;

/// Notice sent to the single participant left in the pool.
pub const WAITING_NOTICE: &str = "Waiting for another user to connect...";

/// Notice sent on successful registration.
pub const CONNECTED_NOTICE: &str = "Connected.";

/// Notice sent when end-call is requested outside a call.
pub const NOT_IN_CALL_NOTICE: &str = "You are not in a call.";

/// Owner of registry, pool and the outbox of every attached connection.
pub struct MatchState {
    registry: ParticipantRegistry,
    pool: WaitingPool,

    /// Outboxes of every live connection, registered or not.
    outboxes: HashMap<ConnectionId, Outbox>,

    event_publisher: broadcast::Sender<MatchEvent>,

    /// Latest roster; readers only ever see the newest snapshot.
    roster_publisher: watch::Sender<RosterSnapshot>,
}

impl MatchState {
    pub fn new(max_participants: usize, event_publisher: broadcast::Sender<MatchEvent>) -> Self {
        Self {
            registry: ParticipantRegistry::new(max_participants),
            pool: WaitingPool::new(),
            outboxes: HashMap::new(),
            event_publisher,
            roster_publisher: watch::channel(RosterSnapshot::default()).0,
        }
    }

    /// Returns a receiver for the latest roster snapshot.
    pub fn roster_feed(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster_publisher.subscribe()
    }

    // ========================================================================
    // Client Events
    // ========================================================================

    /// Routes future notifications for the outbox's connection.
    pub fn attach(&mut self, outbox: Outbox) {
        let connection = outbox.connection();
        if self.outboxes.insert(connection, outbox).is_some() {
            warn!(connection = %connection, "Connection re-attached, replacing outbox");
        } else {
            debug!(connection = %connection, "Connection attached");
        }
    }

    /// Registers a participant and runs the matchmaker.
    ///
    /// On rejection the requester gets a status notice explaining why; the
    /// caller decides whether to close the connection
    /// (`MatchError::closes_connection`).
    pub fn register(
        &mut self,
        connection: ConnectionId,
        display_name: &str,
    ) -> Result<DisplayName, MatchError> {
        let result = DisplayName::parse(display_name)
            .map_err(MatchError::from)
            .and_then(|name| {
                self.registry
                    .register(connection, name)
                    .map(|p| p.name.clone())
            });

        let name = match result {
            Ok(name) => name,
            Err(err) => {
                info!(
                    connection = %connection,
                    requested = %display_name,
                    error = %err,
                    "Registration rejected"
                );
                self.notify(connection, ServerMessage::status(rejection_notice(&err)));
                return Err(err);
            }
        };

        self.pool.enqueue(connection);
        info!(
            connection = %connection,
            name = %name,
            participants = self.registry.len(),
            waiting = self.pool.len(),
            "Participant registered"
        );

        self.notify(connection, ServerMessage::status(CONNECTED_NOTICE));
        self.publish(MatchEvent::Registered {
            connection,
            name: name.clone(),
        });

        self.matchmake();
        self.publish_roster();
        Ok(name)
    }

    /// Forwards a handshake payload between the members of one pair.
    ///
    /// The payload is not inspected. Anything not addressed from a
    /// participant to its current peer, or addressed to a connection that
    /// is gone, is a stale reference and is dropped. Returns true if the
    /// message was queued for delivery.
    pub fn relay(
        &self,
        kind: RelayKind,
        sender: ConnectionId,
        target: ConnectionId,
        payload: serde_json::Value,
    ) -> bool {
        let current_peer = self.registry.get(&sender).and_then(Participant::peer);
        if current_peer != Some(target) {
            debug!(
                kind = %kind,
                sender = %sender,
                target = %target,
                "Dropping relay outside the current pair"
            );
            return false;
        }

        match self.outboxes.get(&target) {
            Some(outbox) => outbox.notify(ServerMessage::relayed(kind, sender, payload)),
            None => {
                debug!(kind = %kind, target = %target, "Relay target has no live connection");
                false
            }
        }
    }

    /// Ends the requester's call; both sides return to the pool.
    ///
    /// The requester is re-enqueued before its peer. Returns the former
    /// peer's handle.
    pub fn end_call(&mut self, connection: ConnectionId) -> Result<ConnectionId, MatchError> {
        let (name, peer) = match self.registry.lookup(&connection) {
            Ok(participant) => match participant.peer() {
                Some(peer) => (participant.name.clone(), peer),
                None => {
                    self.notify(connection, ServerMessage::status(NOT_IN_CALL_NOTICE));
                    return Err(MatchError::NotInCall(connection));
                }
            },
            Err(err) => {
                self.notify(connection, ServerMessage::status(NOT_IN_CALL_NOTICE));
                return Err(err);
            }
        };

        self.registry.release(&connection);
        self.pool.enqueue(connection);
        info!(connection = %connection, name = %name, peer = %peer, "Call ended by participant");

        self.release_survivor(peer, connection, &name, CallEndReason::PeerEndedCall);
        self.notify(
            connection,
            ServerMessage::status("Call ended. Looking for a new partner..."),
        );

        self.matchmake();
        self.publish_roster();
        Ok(peer)
    }

    /// Handles a closed connection. Idempotent.
    ///
    /// Returns true if a registered participant was removed.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        self.outboxes.remove(&connection);

        let Some(participant) = self.registry.remove(&connection) else {
            debug!(connection = %connection, "Unregistered connection closed");
            return false;
        };
        self.pool.remove(&connection);

        info!(
            connection = %connection,
            name = %participant.name,
            in_call = participant.peer().is_some(),
            connected_secs = participant.connected_for().num_seconds(),
            "Participant disconnected"
        );

        if let Some(peer) = participant.peer() {
            self.release_survivor(
                peer,
                connection,
                &participant.name,
                CallEndReason::PeerDisconnected,
            );
        }

        self.publish(MatchEvent::Departed {
            connection,
            name: participant.name,
        });

        self.matchmake();
        self.publish_roster();
        true
    }

    /// Sends the roster snapshot to a single connection.
    pub fn send_roster(&self, connection: ConnectionId) {
        self.notify(connection, ServerMessage::user_list(self.registry.roster()));
    }

    // ========================================================================
    // Matchmaker
    // ========================================================================

    /// Pairs waiting participants, oldest first, until fewer than two remain.
    ///
    /// Safe to call with a stale or empty pool. A dequeued handle that is
    /// gone or no longer Available is dropped; its still-valid partner goes
    /// back to the front of the pool. Returns the number of pairs made.
    pub fn matchmake(&mut self) -> usize {
        let mut paired = 0;

        while self.pool.len() >= 2 {
            let (Some(a), Some(b)) = (self.pool.pop_front(), self.pool.pop_front()) else {
                break;
            };

            let a_valid = self.registry.is_available(&a);
            let b_valid = self.registry.is_available(&b);

            if !(a_valid && b_valid) {
                debug!(
                    a = %a,
                    b = %b,
                    a_valid,
                    b_valid,
                    "Stale pool entry, retrying with remainder"
                );
                if b_valid {
                    self.pool.push_front(b);
                }
                if a_valid {
                    self.pool.push_front(a);
                }
                continue;
            }

            if let Err(err) = self.registry.pair(a, b) {
                // Both were just validated; restore the pool and stop.
                warn!(a = %a, b = %b, error = %err, "Pairing failed");
                self.pool.push_front(b);
                self.pool.push_front(a);
                break;
            }

            self.announce_pair(a, b);
            paired += 1;
        }

        if self.pool.len() == 1 {
            if let Some(waiting) = self.pool.front() {
                self.notify(waiting, ServerMessage::status(WAITING_NOTICE));
            }
        }

        paired
    }

    /// Tells `initiator` to create the offer and `responder` to answer it.
    fn announce_pair(&self, initiator: ConnectionId, responder: ConnectionId) {
        let (Some(a), Some(b)) = (self.registry.get(&initiator), self.registry.get(&responder))
        else {
            return;
        };

        info!(
            initiator = %initiator,
            initiator_name = %a.name,
            responder = %responder,
            responder_name = %b.name,
            "Call initiated"
        );

        self.notify(initiator, ServerMessage::call_initiated(b.name.clone(), responder));
        self.notify(responder, ServerMessage::call_incoming(a.name.clone(), initiator));
        self.publish(MatchEvent::Paired {
            initiator,
            responder,
        });
    }

    /// Returns `survivor` to the pool after `departed` left the call.
    fn release_survivor(
        &mut self,
        survivor: ConnectionId,
        departed: ConnectionId,
        departed_name: &DisplayName,
        reason: CallEndReason,
    ) {
        let still_paired = self
            .registry
            .get(&survivor)
            .is_some_and(|p| p.peer() == Some(departed));
        if !still_paired {
            warn!(
                survivor = %survivor,
                departed = %departed,
                "Peer not found when ending call"
            );
            return;
        }

        self.registry.release(&survivor);
        self.pool.enqueue(survivor);

        let notice = match reason {
            CallEndReason::PeerEndedCall => {
                format!("Call with {departed_name} ended. You are now available.")
            }
            CallEndReason::PeerDisconnected => {
                format!("Your peer ({departed_name}) disconnected. Looking for a new call...")
            }
        };
        self.notify(survivor, ServerMessage::call_ended_by_peer(reason));
        self.notify(survivor, ServerMessage::status(notice));

        self.publish(MatchEvent::CallEnded {
            survivor,
            peer: departed,
            reason,
        });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn lookup(&self, connection: &ConnectionId) -> Option<Participant> {
        self.registry.get(connection).cloned()
    }

    pub fn roster(&self) -> Vec<ParticipantView> {
        self.registry.roster()
    }

    pub fn waiting(&self) -> Vec<ConnectionId> {
        self.pool.snapshot()
    }

    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Best-effort notify; see `Outbox`.
    fn notify(&self, connection: ConnectionId, msg: ServerMessage) {
        match self.outboxes.get(&connection) {
            Some(outbox) => {
                outbox.notify(msg);
            }
            None => debug!(connection = %connection, "No outbox for notification"),
        }
    }

    fn publish(&self, event: MatchEvent) {
        // No subscribers is fine
        let _ = self.event_publisher.send(event);
    }

    fn publish_roster(&self) {
        let watchers = self.roster_publisher.receiver_count();
        let subscribers = self.event_publisher.receiver_count();
        if watchers == 0 && subscribers == 0 {
            return;
        }

        let roster = Arc::new(self.registry.roster());
        self.roster_publisher.send_replace(Arc::clone(&roster));
        if subscribers > 0 {
            self.publish(MatchEvent::RosterUpdated { roster });
        }
    }

    /// Checks the module-level invariants, describing the first violation.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        use std::collections::HashSet;

        let waiting = self.pool.snapshot();
        let unique: HashSet<_> = waiting.iter().collect();
        if unique.len() != waiting.len() {
            return Err(format!("duplicate pool entry in {waiting:?}"));
        }
        for id in &waiting {
            if !self.registry.is_available(id) {
                return Err(format!("pool entry {id} is not a live Available participant"));
            }
        }

        let mut names = HashSet::new();
        for p in self.registry.iter() {
            if !names.insert(p.name.clone()) {
                return Err(format!("display name {} held twice", p.name));
            }
            match p.peer() {
                None if !self.pool.contains(&p.id) => {
                    return Err(format!("available participant {} is not waiting", p.name));
                }
                None => {}
                Some(peer) => {
                    let back = self.registry.get(&peer).and_then(Participant::peer);
                    if back != Some(p.id) {
                        return Err(format!("asymmetric pairing {} -> {peer}", p.name));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Human-readable reason sent with a rejected request.
fn rejection_notice(err: &MatchError) -> String {
    match err {
        MatchError::DuplicateName(name) => {
            format!("User ID \"{name}\" already taken. Please choose another.")
        }
        MatchError::InvalidName(reason) => format!("Invalid display name: {reason}"),
        MatchError::RegistryFull { .. } => "Server is full. Please try again later.".to_string(),
        MatchError::AlreadyRegistered(_) => "You are already registered.".to_string(),
        other => other.to_string(),
    }
}
