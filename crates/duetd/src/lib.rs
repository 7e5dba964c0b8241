//! duet daemon - call matchmaking and WebRTC signaling relay
//!
//! This crate provides the core infrastructure for the duet daemon:
//! - `matchmaking` - Matchmaker actor owning the registry and waiting pool
//! - `server` - WebSocket server and per-connection handlers
//! - `config` - TOML configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       duetd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ SignalingServer │────▶│      MatchmakerActor        │   │
//! │  │   (WebSocket)   │     │ (registry + pool + outboxes)│   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ notifications     │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│  Outbox (per connection)    │   │
//! │  │  (per client)   │     │  watch (latest roster)      │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The server never inspects handshake payloads; it only routes them
//! between the two members of a pair.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   outside tests
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod matchmaking;
pub mod server;
