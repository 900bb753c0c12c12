//! In-process transport backed by bounded channels.
//!
//! The server side is a [`MemoryTransport`]; the other end is a
//! [`MemoryPeer`] that plays the remote client. Dropping the peer looks
//! like a clean close to the server. A peer that stops reading fills
//! its channel, which makes server writes block exactly like a stalled
//! socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use rps_protocol::{decode, encode, Message};

use super::{CloseStatus, FrameSink, FrameSource, Transport, TransportError};

/// What the server sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Frame(String),
    Closed { status: CloseStatus, reason: String },
}

/// Creates a connected transport/peer pair.
///
/// `buffer` bounds each direction.
pub fn memory_pair(buffer: usize) -> (MemoryTransport, MemoryPeer) {
    let (to_server, from_peer) = mpsc::channel(buffer.max(1));
    let (to_peer, from_server) = mpsc::channel(buffer.max(1));
    (
        MemoryTransport {
            incoming: from_peer,
            outgoing: to_peer,
        },
        MemoryPeer {
            to_server,
            from_server,
        },
    )
}

/// Server half of a [`memory_pair`].
pub struct MemoryTransport {
    incoming: mpsc::Receiver<Vec<u8>>,
    outgoing: mpsc::Sender<PeerEvent>,
}

impl Transport for MemoryTransport {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn split(self) -> (MemorySource, MemorySink) {
        (
            MemorySource {
                incoming: self.incoming,
            },
            MemorySink {
                outgoing: self.outgoing,
                closed: false,
            },
        )
    }
}

pub struct MemorySource {
    incoming: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.incoming.recv().await)
    }
}

pub struct MemorySink {
    outgoing: mpsc::Sender<PeerEvent>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(PeerEvent::Frame(frame.to_string()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        self.outgoing
            .send(PeerEvent::Closed {
                status,
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Client end of a [`memory_pair`].
pub struct MemoryPeer {
    to_server: mpsc::Sender<Vec<u8>>,
    from_server: mpsc::Receiver<PeerEvent>,
}

impl MemoryPeer {
    /// Sends an encoded message to the server.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.send_raw(encode(msg).into_bytes()).await
    }

    /// Sends raw bytes, bypassing the codec.
    pub async fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.to_server
            .send(bytes.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Receives the next event; `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.from_server.recv().await
    }

    /// Receives the next frame and decodes it.
    ///
    /// Returns `None` on close or when the server side is gone.
    pub async fn recv_message(&mut self) -> Option<Message> {
        match self.recv().await? {
            PeerEvent::Frame(frame) => Some(decode(frame.as_bytes())),
            PeerEvent::Closed { .. } => None,
        }
    }
}
