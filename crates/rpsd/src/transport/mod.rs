//! Duplex frame transport abstraction.
//!
//! A connection is split into a `FrameSource` (read half, owned by the
//! session's reader task) and a `FrameSink` (write half, owned by the
//! session's dispatch loop). Two implementations ship with the crate:
//! - `ws` - WebSocket over TCP (the production transport)
//! - `memory` - channel-backed pair for tests and embedders

mod memory;
mod ws;

pub use memory::{memory_pair, MemoryPeer, MemoryTransport, PeerEvent};
pub use ws::{WsSink, WsSource, WsTransport};

use async_trait::async_trait;
use std::fmt;

/// Close status sent to the peer when the server ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// Orderly close (lobby exit, game over)
    Normal,
    /// The lobby is going away
    GoingAway,
    /// The peer broke the rules (slow consumer, bad route)
    PolicyViolation,
    /// The server hit an unexpected condition on this connection
    Abnormal,
}

impl CloseStatus {
    /// Returns the WebSocket close code.
    ///
    /// `Abnormal` maps to 1011: 1006 is reserved and may not be sent.
    pub const fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
            Self::Abnormal => 1011,
        }
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Normal => "normal",
            Self::GoingAway => "going away",
            Self::PolicyViolation => "policy violation",
            Self::Abnormal => "abnormal",
        };
        write!(f, "{label} ({})", self.code())
    }
}

/// Errors raised by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Read half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Receives the next data frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection. Control
    /// frames are handled internally and never surface here.
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one text frame.
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Sends a close frame with the given status and reason.
    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError>;
}

/// A connection that can be split into independent halves.
pub trait Transport: Send + 'static {
    type Source: FrameSource + 'static;
    type Sink: FrameSink + 'static;

    fn split(self) -> (Self::Source, Self::Sink);
}
