//! Client interface for interacting with the MatchmakerActor.
//!
//! The `MatchmakerHandle` provides a cheap-to-clone interface for sending
//! client events to the matchmaker and subscribing to match events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `MatchError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use duet_core::{ConnectionId, DisplayName, Participant, ParticipantView};
use duet_protocol::RelayKind;

use super::commands::{MatchCommand, MatchError, MatchEvent, RosterSnapshot};
use super::outbox::Outbox;

// ============================================================================
// Matchmaker Handle
// ============================================================================

/// Handle for interacting with the matchmaker actor.
///
/// # Usage
///
/// ```ignore
/// let handle = matchmaker.clone();
///
/// handle.attach(outbox).await?;
/// let name = handle.register(connection, "alice".to_string()).await?;
///
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct MatchmakerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<MatchCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<MatchEvent>,

    /// Latest roster snapshot
    roster: watch::Receiver<RosterSnapshot>,
}

impl MatchmakerHandle {
    pub fn new(
        sender: mpsc::Sender<MatchCommand>,
        event_sender: broadcast::Sender<MatchEvent>,
        roster: watch::Receiver<RosterSnapshot>,
    ) -> Self {
        Self {
            sender,
            event_sender,
            roster,
        }
    }

    /// Routes notifications for a newly accepted connection to `outbox`.
    ///
    /// # Errors
    ///
    /// - `MatchError::ChannelClosed` if the actor has shut down
    pub async fn attach(&self, outbox: Outbox) -> Result<(), MatchError> {
        self.sender
            .send(MatchCommand::Attach { outbox })
            .await
            .map_err(|_| MatchError::ChannelClosed)
    }

    /// Claims a display name and enters the waiting pool.
    ///
    /// # Errors
    ///
    /// - `MatchError::InvalidName` if the name fails validation
    /// - `MatchError::DuplicateName` if a live participant holds the name
    /// - `MatchError::RegistryFull` if the registry is at capacity
    /// - `MatchError::AlreadyRegistered` if this connection registered before
    /// - `MatchError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        connection: ConnectionId,
        display_name: String,
    ) -> Result<DisplayName, MatchError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MatchCommand::Register {
                connection,
                display_name,
                respond_to: tx,
            })
            .await
            .map_err(|_| MatchError::ChannelClosed)?;

        rx.await.map_err(|_| MatchError::ChannelClosed)?
    }

    /// Forwards a handshake payload to the sender's current peer.
    ///
    /// Fire-and-forget; payloads outside the current pair are dropped by
    /// the actor.
    ///
    /// # Errors
    ///
    /// - `MatchError::ChannelClosed` if the actor has shut down
    pub async fn relay(
        &self,
        kind: RelayKind,
        sender: ConnectionId,
        target: ConnectionId,
        payload: serde_json::Value,
    ) -> Result<(), MatchError> {
        self.sender
            .send(MatchCommand::Relay {
                kind,
                sender,
                target,
                payload,
            })
            .await
            .map_err(|_| MatchError::ChannelClosed)
    }

    /// Ends the connection's current call, returning the former peer.
    ///
    /// # Errors
    ///
    /// - `MatchError::NotRegistered` if the connection never registered
    /// - `MatchError::NotInCall` if the participant is not in a call
    /// - `MatchError::ChannelClosed` if the actor has shut down
    pub async fn end_call(&self, connection: ConnectionId) -> Result<ConnectionId, MatchError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MatchCommand::EndCall {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| MatchError::ChannelClosed)?;

        rx.await.map_err(|_| MatchError::ChannelClosed)?
    }

    /// Reports a closed connection.
    ///
    /// Returns true if a registered participant was removed; false for
    /// unknown handles, repeats, or if the actor has shut down.
    pub async fn disconnect(&self, connection: ConnectionId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(MatchCommand::Disconnect {
                connection,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Asks the actor to send a roster snapshot to one connection.
    ///
    /// # Errors
    ///
    /// - `MatchError::ChannelClosed` if the actor has shut down
    pub async fn send_roster(&self, connection: ConnectionId) -> Result<(), MatchError> {
        self.sender
            .send(MatchCommand::SendRoster { connection })
            .await
            .map_err(|_| MatchError::ChannelClosed)
    }

    /// Get a single participant by handle.
    ///
    /// Returns `None` if not registered or if the actor is unreachable.
    pub async fn lookup(&self, connection: ConnectionId) -> Option<Participant> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MatchCommand::Lookup {
                connection,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Roster snapshot in registration order.
    ///
    /// Returns an empty vector if the actor is unreachable.
    pub async fn roster(&self) -> Vec<ParticipantView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(MatchCommand::Roster { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Waiting pool in FIFO order.
    ///
    /// Returns an empty vector if the actor is unreachable.
    pub async fn waiting(&self) -> Vec<ConnectionId> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(MatchCommand::Waiting { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribe to match events.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.event_sender.subscribe()
    }

    /// Watches the roster. Only changes after this call are reported.
    pub fn roster_updates(&self) -> watch::Receiver<RosterSnapshot> {
        let mut rx = self.roster.clone();
        rx.borrow_and_update();
        rx
    }

    /// Returns true while the actor is accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_handle() -> (MatchmakerHandle, mpsc::Receiver<MatchCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let (_roster_tx, roster_rx) = watch::channel(RosterSnapshot::default());
        let handle = MatchmakerHandle::new(cmd_tx, event_tx, roster_rx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (handle, mut rx) = create_test_handle();
        let id = ConnectionId::new();

        let cmd_handler = tokio::spawn(async move {
            if let Some(MatchCommand::Register {
                connection,
                display_name,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(connection, id);
                let _ = respond_to.send(DisplayName::parse(&display_name).map_err(Into::into));
                return true;
            }
            false
        });

        let result = handle.register(id, "alice".to_string()).await;
        assert_eq!(result.unwrap().as_str(), "alice");
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.register(ConnectionId::new(), "alice".to_string()).await;
        assert_eq!(result, Err(MatchError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_register_reply_dropped() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            // Receive and drop without replying
            let _ = rx.recv().await;
        });

        let result = handle.register(ConnectionId::new(), "alice".to_string()).await;
        assert_eq!(result, Err(MatchError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_relay_is_fire_and_forget() {
        let (handle, mut rx) = create_test_handle();
        let sender = ConnectionId::new();
        let target = ConnectionId::new();

        handle
            .relay(RelayKind::Offer, sender, target, json!({"sdp": "v=0"}))
            .await
            .unwrap();

        match rx.recv().await {
            Some(MatchCommand::Relay {
                kind,
                sender: s,
                target: t,
                payload,
            }) => {
                assert_eq!(kind, RelayKind::Offer);
                assert_eq!((s, t), (sender, target));
                assert_eq!(payload, json!({"sdp": "v=0"}));
            }
            other => panic!("expected relay command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_call_propagates_error() {
        let (handle, mut rx) = create_test_handle();
        let id = ConnectionId::new();

        tokio::spawn(async move {
            if let Some(MatchCommand::EndCall {
                connection,
                respond_to,
            }) = rx.recv().await
            {
                let _ = respond_to.send(Err(MatchError::NotInCall(connection)));
            }
        });

        assert_eq!(handle.end_call(id).await, Err(MatchError::NotInCall(id)));
    }

    #[tokio::test]
    async fn test_disconnect_channel_closed_is_false() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(!handle.disconnect(ConnectionId::new()).await);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_queries_channel_closed_return_empty() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.lookup(ConnectionId::new()).await.is_none());
        assert!(handle.roster().await.is_empty());
        assert!(handle.waiting().await.is_empty());
        assert_eq!(
            handle.send_roster(ConnectionId::new()).await,
            Err(MatchError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(16);
        let (event_tx, _) = broadcast::channel(16);
        let (_roster_tx, roster_rx) = watch::channel(RosterSnapshot::default());
        let handle = MatchmakerHandle::new(cmd_tx, event_tx.clone(), roster_rx);
        let mut events = handle.subscribe();

        let id = ConnectionId::new();
        event_tx
            .send(MatchEvent::Departed {
                connection: id,
                name: DisplayName::parse("alice").unwrap(),
            })
            .unwrap();

        assert!(matches!(
            events.recv().await,
            Ok(MatchEvent::Departed { connection, .. }) if connection == id
        ));
    }

    #[tokio::test]
    async fn test_roster_updates_skip_the_current_snapshot() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(16);
        let (event_tx, _) = broadcast::channel(16);
        let (roster_tx, roster_rx) = watch::channel(RosterSnapshot::default());
        let handle = MatchmakerHandle::new(cmd_tx, event_tx, roster_rx);

        roster_tx.send_replace(RosterSnapshot::default());
        let mut updates = handle.roster_updates();
        assert!(!updates.has_changed().unwrap());

        let alice = ParticipantView {
            id: "alice".to_string(),
            status: duet_core::PresenceState::Available,
            peer: None,
        };
        roster_tx.send_replace(std::sync::Arc::new(vec![alice.clone()]));

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().as_slice(), &[alice]);
    }
}
