//! RPS Protocol - Wire protocol for lobby sessions
//!
//! This crate provides the frame envelope exchanged over a lobby
//! connection (`message`, `codec`) and the text payloads the server
//! puts inside those frames (`payload`).

pub mod codec;
pub mod message;
pub mod payload;

pub use codec::{decode, encode, DELIMITER};
pub use message::{Command, Message, MessageKind};
