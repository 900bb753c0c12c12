//! RPS Core - Shared types for the lobby server
//!
//! This crate provides the domain types shared between the wire
//! protocol (rps-protocol) and the daemon (rpsd):
//! - `lobby` - identifiers, roster entries, lifecycle state, summaries
//! - `choice` - the four playable cards and their ordering
//! - `game` - the round resolver and per-game state machine
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod choice;
pub mod error;
pub mod game;
pub mod lobby;

// Re-exports for convenience
pub use choice::Choice;
pub use error::{ChoiceError, GameError, GameResult};
pub use game::{resolve, Game, GameState, PlayerRecord, RoundOutcome, RoundResult, PLAYERS};
pub use lobby::{ClientId, LobbyId, LobbyState, LobbySummary, Participant};
