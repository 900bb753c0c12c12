//! RPS Daemon - Lobby coordinator, broadcast bus and WebSocket server
//!
//! This crate provides the server side of the lobby game:
//! - `transport` - Frame transport seam, WebSocket and in-memory implementations
//! - `bus` - Per-lobby fan-out to every live session
//! - `session` - One client connection: reader task plus dispatch loop
//! - `lobby` - Lobby lifecycle, roster, and the round loop
//! - `directory` - Lobby directory actor (id → lobby)
//! - `server` - TCP accept loop and handshake routing
//! - `config` - TOML configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        rpsd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   GameServer    │────▶│      DirectoryActor         │    │
//! │  │  (WebSocket)    │     │  (lobby map owner)          │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ attach_session              │ Arc<Lobby>        │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   Connection    │◀────│  Lobby + BroadcastBus       │    │
//! │  │  (per client)   │     │  (roster, rounds, fan-out)  │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod bus;
pub mod config;
pub mod directory;
pub mod lobby;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{LobbySettings, ServerConfig, Timing};
pub use directory::{spawn_directory, DirectoryError, DirectoryHandle};
pub use lobby::{DisbandReason, Lobby, LobbyError};
pub use server::{GameServer, ServerError};
