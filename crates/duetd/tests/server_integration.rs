//! Integration tests for the WebSocket signaling server.
//!
//! These tests run the SignalingServer on an ephemeral port and talk to it
//! over real WebSocket connections, covering pairing, relay, call teardown,
//! protocol errors, connection limits and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use duet_core::{ConnectionId, PresenceState};
use duet_protocol::{
    decode_server, CallEndReason, ClientMessage, ProtocolVersion, RelayKind, ServerMessage,
};
use duetd::config::DaemonConfig;
use duetd::matchmaking::{spawn_matchmaker, MatchmakerHandle, CONNECTED_NOTICE, WAITING_NOTICE};
use duetd::server::{SignalingServer, END_ROOM_NOTICE, HEALTH_BODY, SERVER_FULL_REASON};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any single server message
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    matchmaker: MatchmakerHandle,
    cancel_token: CancellationToken,
}

impl TestServer {
    /// Spawns a server with roster broadcasting off, so tests only see the
    /// messages they provoke.
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    async fn spawn_with(customize: impl FnOnce(&mut DaemonConfig)) -> Self {
        let mut config = DaemonConfig::default();
        config.server.bind = "127.0.0.1:0".parse().unwrap();
        config.matchmaking.broadcast_roster = false;
        customize(&mut config);

        let matchmaker = spawn_matchmaker(config.matchmaking.max_participants);
        let cancel_token = CancellationToken::new();

        let server = SignalingServer::bind(&config, matchmaker.clone(), cancel_token.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        TestServer {
            addr,
            matchmaker,
            cancel_token,
        }
    }

    /// Opens a client connection and consumes the `connected` greeting.
    async fn connect(&self) -> TestClient {
        let mut client = self.connect_raw().await;
        match client.recv().await {
            ServerMessage::Connected {
                connection_id,
                protocol_version,
            } => {
                assert_eq!(protocol_version, ProtocolVersion::CURRENT);
                client.id = connection_id;
            }
            other => panic!("expected connected, got {other:?}"),
        }
        client
    }

    /// Opens a client connection without reading anything.
    async fn connect_raw(&self) -> TestClient {
        let (ws, _) = connect_async(format!("ws://{}", self.addr))
            .await
            .expect("connect to server");
        TestClient {
            ws,
            id: ConnectionId::default(),
        }
    }

    /// Connects and registers, consuming the "Connected." notice.
    async fn join(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(ClientMessage::register(name)).await;
        assert_eq!(client.recv_status().await, CONNECTED_NOTICE);
        client
    }

    /// Sends a plain HTTP GET and returns the raw response.
    async fn http_get(&self) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        timeout(RECV_TIMEOUT, stream.read_to_string(&mut response))
            .await
            .expect("timed out waiting for health response")
            .unwrap();
        response
    }

    /// Shuts down the server gracefully.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: ConnectionId,
}

impl TestClient {
    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_text(&json).await;
    }

    async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Receives the next protocol message, skipping control frames.
    async fn recv(&mut self) -> ServerMessage {
        self.recv_within(RECV_TIMEOUT).await
    }

    async fn recv_within(&mut self, limit: Duration) -> ServerMessage {
        loop {
            let frame = timeout(limit, self.ws.next())
                .await
                .expect("timed out waiting for server message")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return decode_server(text.as_str()).unwrap();
            }
        }
    }

    async fn recv_status(&mut self) -> String {
        match self.recv().await {
            ServerMessage::Status { message } => message,
            other => panic!("expected status, got {other:?}"),
        }
    }

    /// Returns true once the server has closed the connection.
    async fn closed(&mut self) -> bool {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }
}

/// Registers two clients and checks they were paired, alice initiating.
async fn paired(server: &TestServer) -> (TestClient, TestClient) {
    let mut alice = server.join("alice").await;
    assert_eq!(alice.recv_status().await, WAITING_NOTICE);

    let mut bob = server.join("bob").await;

    assert_eq!(
        alice.recv().await,
        ServerMessage::CallInitiated {
            peer_name: "bob".to_string().try_into().unwrap(),
            peer_id: bob.id,
        }
    );
    assert_eq!(
        bob.recv().await,
        ServerMessage::CallIncoming {
            peer_name: "alice".to_string().try_into().unwrap(),
            peer_id: alice.id,
        }
    );
    (alice, bob)
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_connect_assigns_distinct_handles() {
    let server = TestServer::spawn().await;

    let a = server.connect().await;
    let b = server.connect().await;
    assert_ne!(a.id, b.id);

    server.shutdown().await;
}

#[tokio::test]
async fn test_plain_http_get_is_health_check() {
    let server = TestServer::spawn().await;

    let response = server.http_get().await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with(HEALTH_BODY));

    // The port still speaks WebSocket
    let mut client = server.connect().await;
    client.send(ClientMessage::ping(1)).await;
    assert_eq!(client.recv().await, ServerMessage::pong(1));

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::ping(7)).await;
    assert_eq!(client.recv().await, ServerMessage::pong(7));

    server.shutdown().await;
}

// ============================================================================
// Matchmaking
// ============================================================================

#[tokio::test]
async fn test_two_clients_are_paired() {
    let server = TestServer::spawn().await;
    let (alice, bob) = paired(&server).await;

    let record = server.matchmaker.lookup(alice.id).await.unwrap();
    assert_eq!(record.peer(), Some(bob.id));
    assert!(server.matchmaker.waiting().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_relay_roundtrip_is_unmodified() {
    let server = TestServer::spawn().await;
    let (mut alice, mut bob) = paired(&server).await;

    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"});
    alice
        .send(ClientMessage::relay(RelayKind::Offer, bob.id, offer.clone()))
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::Offer {
            sender: alice.id,
            sdp: offer
        }
    );

    let answer = json!({"type": "answer", "sdp": "v=0"});
    bob.send(ClientMessage::relay(RelayKind::Answer, alice.id, answer.clone()))
        .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::Answer {
            sender: bob.id,
            sdp: answer
        }
    );

    let candidate = json!({
        "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
        "sdpMid": "0"
    });
    bob.send(ClientMessage::relay(
        RelayKind::IceCandidate,
        alice.id,
        candidate.clone(),
    ))
    .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::IceCandidate {
            sender: bob.id,
            candidate
        }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_relay_to_non_peer_is_dropped() {
    let server = TestServer::spawn().await;
    let (mut alice, _bob) = paired(&server).await;
    let mut carol = server.join("carol").await;
    assert_eq!(carol.recv_status().await, WAITING_NOTICE);

    alice
        .send(ClientMessage::relay(RelayKind::Offer, carol.id, json!({})))
        .await;

    // Nothing relayed: the next thing carol sees is the pong for carol's ping
    carol.send(ClientMessage::ping(1)).await;
    assert_eq!(carol.recv().await, ServerMessage::pong(1));

    server.shutdown().await;
}

#[tokio::test]
async fn test_end_call_notifies_peer_and_requeues() {
    let server = TestServer::spawn().await;
    let (mut alice, mut bob) = paired(&server).await;

    alice.send(ClientMessage::end_call()).await;

    assert_eq!(
        bob.recv().await,
        ServerMessage::call_ended_by_peer(CallEndReason::PeerEndedCall)
    );
    assert_eq!(
        bob.recv_status().await,
        "Call with alice ended. You are now available."
    );

    // Both re-entered the pool, alice first, and were paired again
    assert!(matches!(
        bob.recv().await,
        ServerMessage::CallIncoming { peer_id, .. } if peer_id == alice.id
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_end_call_outside_call() {
    let server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    assert_eq!(alice.recv_status().await, WAITING_NOTICE);

    alice.send(ClientMessage::end_call()).await;
    assert_eq!(alice.recv_status().await, "You are not in a call.");

    server.shutdown().await;
}

#[tokio::test]
async fn test_peer_disconnect_notifies_survivor() {
    let server = TestServer::spawn().await;
    let (mut alice, bob) = paired(&server).await;
    let bob_id = bob.id;

    drop(bob);

    assert_eq!(
        alice.recv().await,
        ServerMessage::call_ended_by_peer(CallEndReason::PeerDisconnected)
    );
    assert_eq!(
        alice.recv_status().await,
        "Your peer (bob) disconnected. Looking for a new call..."
    );
    assert_eq!(alice.recv_status().await, WAITING_NOTICE);

    assert!(server.matchmaker.lookup(bob_id).await.is_none());
    assert_eq!(server.matchmaker.waiting().await, vec![alice.id]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_closes_second_connection() {
    let server = TestServer::spawn().await;
    let mut first = server.join("dave").await;
    assert_eq!(first.recv_status().await, WAITING_NOTICE);

    let mut second = server.connect().await;
    second.send(ClientMessage::register("dave")).await;
    assert_eq!(
        second.recv_status().await,
        "User ID \"dave\" already taken. Please choose another."
    );
    assert!(second.closed().await);

    // First holder is untouched
    let record = server.matchmaker.lookup(first.id).await.unwrap();
    assert!(record.is_available());
    first.send(ClientMessage::ping(2)).await;
    assert_eq!(first.recv().await, ServerMessage::pong(2));

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_participants() {
    let server = TestServer::spawn().await;
    let (mut alice, _bob) = paired(&server).await;

    alice.send(ClientMessage::list_participants()).await;
    match alice.recv().await {
        ServerMessage::UserList { users } => {
            assert_eq!(users.len(), 2);
            assert_eq!(users[0].id, "alice");
            assert_eq!(users[0].status, PresenceState::InCall);
            assert_eq!(users[0].peer.as_deref(), Some("bob"));
            assert_eq!(users[1].peer.as_deref(), Some("alice"));
        }
        other => panic!("expected user-list, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_roster_broadcast_when_enabled() {
    let server = TestServer::spawn_with(|c| c.matchmaking.broadcast_roster = true).await;
    let mut watcher = server.connect().await;

    let mut alice = server.connect().await;
    alice.send(ClientMessage::register("alice")).await;

    // An unregistered connection still sees the roster change
    loop {
        if let ServerMessage::UserList { users } = watcher.recv().await {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, "alice");
            assert_eq!(users[0].status, PresenceState::Available);
            break;
        }
    }

    server.shutdown().await;
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn test_malformed_message_keeps_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_text("{not json").await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("malformed-message"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    client.send_text(r#"{"type": "teleport"}"#).await;
    assert!(matches!(client.recv().await, ServerMessage::Error { .. }));

    client.send(ClientMessage::ping(3)).await;
    assert_eq!(client.recv().await, ServerMessage::pong(3));

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversize_message_rejected() {
    let server = TestServer::spawn_with(|c| c.server.max_message_size = 128).await;
    let mut client = server.connect().await;

    let big = format!(r#"{{"type":"register","display_name":"{}"}}"#, "x".repeat(256));
    client.send_text(&big).await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("message-too-large"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_frame_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
    match client.recv().await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("unsupported-frame"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_version_mismatch_rejected_and_closed() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send_text(r#"{"protocol_version": {"major": 2, "minor": 0}, "type": "ping", "seq": 1}"#)
        .await;
    match client.recv().await {
        ServerMessage::Rejected {
            reason,
            protocol_version,
        } => {
            assert!(reason.contains("2.0"));
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
        }
        other => panic!("expected rejected, got {other:?}"),
    }
    assert!(client.closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_end_room_closes_connection() {
    let server = TestServer::spawn().await;
    let (mut alice, mut bob) = paired(&server).await;

    alice.send(ClientMessage::end_room()).await;
    assert_eq!(alice.recv_status().await, END_ROOM_NOTICE);
    assert!(alice.closed().await);

    // Leaving the room is a disconnect for the peer
    assert_eq!(
        bob.recv().await,
        ServerMessage::call_ended_by_peer(CallEndReason::PeerDisconnected)
    );

    server.shutdown().await;
}

// ============================================================================
// Limits and Shutdown
// ============================================================================

#[tokio::test]
async fn test_connection_limit() {
    let server = TestServer::spawn_with(|c| c.server.max_connections = 1).await;
    let _first = server.connect().await;

    let mut second = server.connect_raw().await;
    match second.recv().await {
        ServerMessage::Rejected { reason, .. } => assert_eq!(reason, SERVER_FULL_REASON),
        other => panic!("expected rejected, got {other:?}"),
    }
    assert!(second.closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_check_at_connection_limit() {
    let server = TestServer::spawn_with(|c| c.server.max_connections = 1).await;
    let _first = server.connect().await;

    let response = server.http_get().await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with(HEALTH_BODY));

    server.shutdown().await;
}

#[tokio::test]
async fn test_silent_client_times_out_and_peer_is_requeued() {
    let server = TestServer::spawn_with(|c| {
        c.server.heartbeat_interval_secs = 1;
        c.server.idle_timeout_secs = 2;
    })
    .await;
    let (mut alice, bob) = paired(&server).await;

    // bob is never read again, so the server's pings go unanswered.
    // alice keeps reading, which answers them.
    assert_eq!(
        alice.recv_within(Duration::from_secs(8)).await,
        ServerMessage::call_ended_by_peer(CallEndReason::PeerDisconnected)
    );
    assert_eq!(
        alice.recv_status().await,
        "Your peer (bob) disconnected. Looking for a new call..."
    );
    assert_eq!(alice.recv_status().await, WAITING_NOTICE);

    assert!(server.matchmaker.lookup(bob.id).await.is_none());
    assert_eq!(server.matchmaker.waiting().await, vec![alice.id]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_registry_capacity() {
    let server = TestServer::spawn_with(|c| c.matchmaking.max_participants = 1).await;
    let _first = server.join("first").await;

    let mut second = server.connect().await;
    second.send(ClientMessage::register("second")).await;
    assert_eq!(
        second.recv_status().await,
        "Server is full. Please try again later."
    );
    assert!(second.closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let cancel = server.cancel_token.clone();

    cancel.cancel();
    assert!(client.closed().await);
}
