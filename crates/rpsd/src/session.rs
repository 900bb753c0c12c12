//! Connection session: one live connection bound to one lobby participant.
//!
//! A session runs two units of execution:
//! - a reader task that decodes inbound frames and routes them into
//!   bounded channels (commands, text, corrupted frames)
//! - the dispatch loop, which is the only writer on the transport. It
//!   drains the outbox filled by the broadcast bus, executes commands
//!   and probes the peer after a corrupted frame.
//!
//! ```text
//!   socket ──▶ reader task ──┬─▶ commands ──▶ dispatch loop ──▶ socket
//!                            ├─▶ errors   ──▶     ▲
//!                            └─▶ text     ──▶ coordinator (round barrier)
//!                                                 │
//!   BroadcastBus ──────────────▶ outbox ──────────┘
//! ```
//!
//! Text is never interpreted here. The reader only stamps it with the
//! round open on the lobby's `TurnGate`; it belongs to the coordinator,
//! which takes the text channel when a game starts.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` or indexing
//! - Every write is bounded by the configured write timeout

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rps_core::ClientId;
use rps_protocol::{decode, encode, payload, Command, Message};

use crate::bus::{BroadcastBus, CloseRequest, InboundText, SessionHandle, SessionId, TurnGate};
use crate::config::LobbySettings;
use crate::transport::{CloseStatus, FrameSink, FrameSource, Transport, TransportError};

/// Frames larger than this are treated as corrupted
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Close reason for a client-requested exit
pub const EXIT_REASON: &str = "Lobby exit on request";

/// What a session calls back into.
///
/// Implemented by the lobby coordinator. Calls are synchronous and must
/// not block.
pub trait SessionDelegate: Send + Sync {
    /// Removes `client` from the roster.
    fn exit(&self, client: &ClientId);

    /// Sets or clears `client`'s ready flag. Returns false if refused.
    fn set_ready(&self, client: &ClientId, ready: bool) -> bool;

    /// Current game-details snapshot, if a game exists.
    fn game_details(&self) -> Option<String>;
}

/// Channel sizes and deadlines for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub outbox_capacity: usize,
    pub inbox_capacity: usize,
    pub write_timeout: Duration,
}

impl SessionConfig {
    pub fn from_settings(settings: &LobbySettings) -> Self {
        Self {
            outbox_capacity: settings.outbox_capacity.max(1),
            inbox_capacity: settings.inbox_capacity.max(1),
            write_timeout: settings.write_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&LobbySettings::default())
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent lobby-exit
    Exited,
    /// The peer closed the connection
    PeerClosed,
    /// A read or write failed or timed out
    ConnectionLost(String),
    /// The server closed the session (eviction, exit, disband)
    Closed(CloseRequest),
}

impl SessionEnd {
    /// Close status and reason to send on the way out.
    pub fn close_frame(&self) -> (CloseStatus, &str) {
        match self {
            Self::Exited => (CloseStatus::Normal, EXIT_REASON),
            Self::PeerClosed => (CloseStatus::Normal, ""),
            Self::ConnectionLost(_) => (CloseStatus::Abnormal, "Connection lost"),
            Self::Closed(request) => (request.status, request.reason.as_str()),
        }
    }
}

/// Errors raised while writing to the peer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Write timeout")]
    WriteTimeout,
}

/// How the reader task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadEnd {
    PeerClosed,
    Failed(String),
    DispatchGone,
}

/// A connection waiting to be run.
pub struct Connection<T: Transport> {
    handle: Arc<SessionHandle>,
    transport: T,
    outbox: mpsc::Receiver<String>,
    text_tx: mpsc::Sender<InboundText>,
    gate: Arc<TurnGate>,
    config: SessionConfig,
}

impl<T: Transport> Connection<T> {
    /// Creates a session for `client_id` over `transport`.
    ///
    /// `cancel` should be a child of the lobby's token so that a disband
    /// reaches every session. `gate` stamps inbound text with the open
    /// round.
    pub fn new(
        id: SessionId,
        client_id: ClientId,
        transport: T,
        cancel: CancellationToken,
        gate: Arc<TurnGate>,
        config: SessionConfig,
    ) -> Self {
        let (outbox_tx, outbox) = mpsc::channel(config.outbox_capacity.max(1));
        let (text_tx, text_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let handle = Arc::new(SessionHandle::new(id, client_id, outbox_tx, text_rx, cancel));
        Self {
            handle,
            transport,
            outbox,
            text_tx,
            gate,
            config,
        }
    }

    /// Returns the handle to register with the broadcast bus.
    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    /// Runs the session until it ends.
    ///
    /// `greeting` is written before anything else. On the way out the
    /// session leaves `bus`, triggers the participant-exit exactly once
    /// (unless the exit path already claimed it) and closes the
    /// transport.
    pub async fn run(
        self,
        bus: &BroadcastBus,
        delegate: &dyn SessionDelegate,
        greeting: Option<Message>,
    ) -> SessionEnd {
        let Connection {
            handle,
            transport,
            mut outbox,
            text_tx,
            gate,
            config,
        } = self;

        let (source, mut sink) = transport.split();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.inbox_capacity);
        let (err_tx, err_rx) = mpsc::channel(config.inbox_capacity);
        let mut reader = tokio::spawn(read_loop(
            source,
            cmd_tx,
            text_tx,
            err_tx,
            gate,
            handle.id(),
        ));

        debug!(
            session = handle.id(),
            client_id = %handle.client_id(),
            "Session started"
        );

        let mut dispatch = Dispatch {
            handle: &handle,
            sink: &mut sink,
            delegate,
            write_timeout: config.write_timeout,
        };

        let end = match greeting {
            Some(msg) => match dispatch.write(&msg).await {
                Ok(()) => {
                    dispatch
                        .run(&mut outbox, cmd_rx, err_rx, &mut reader)
                        .await
                }
                Err(e) => SessionEnd::ConnectionLost(e.to_string()),
            },
            None => {
                dispatch
                    .run(&mut outbox, cmd_rx, err_rx, &mut reader)
                    .await
            }
        };

        reader.abort();
        bus.unregister(handle.id());
        outbox.close();

        if end != SessionEnd::Exited && handle.mark_exited() {
            delegate.exit(handle.client_id());
        }

        let (status, reason) = end.close_frame();
        match timeout(config.write_timeout, sink.close(status, reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = handle.id(), error = %e, "Close frame not sent"),
            Err(_) => debug!(session = handle.id(), "Close frame timed out"),
        }

        info!(
            session = handle.id(),
            client_id = %handle.client_id(),
            end = ?end,
            "Session ended"
        );
        end
    }
}

// ============================================================================
// Dispatch loop
// ============================================================================

struct Dispatch<'a, K: FrameSink> {
    handle: &'a SessionHandle,
    sink: &'a mut K,
    delegate: &'a dyn SessionDelegate,
    write_timeout: Duration,
}

impl<K: FrameSink> Dispatch<'_, K> {
    async fn run(
        &mut self,
        outbox: &mut mpsc::Receiver<String>,
        mut commands: mpsc::Receiver<(Command, String)>,
        mut errors: mpsc::Receiver<Vec<u8>>,
        reader: &mut JoinHandle<ReadEnd>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                _ = self.handle.cancel_token().cancelled() => {
                    return self.closed_by_server(outbox).await;
                }

                frame = outbox.recv() => {
                    let Some(frame) = frame else {
                        return self.closed_by_server(outbox).await;
                    };
                    if let Err(e) = self.write_frame(&frame).await {
                        return SessionEnd::ConnectionLost(e.to_string());
                    }
                }

                command = commands.recv() => {
                    let Some((command, content)) = command else {
                        return reader_end(reader).await;
                    };
                    if let Some(end) = self.execute(command, &content).await {
                        return end;
                    }
                }

                raw = errors.recv() => {
                    let Some(raw) = raw else {
                        return reader_end(reader).await;
                    };
                    warn!(
                        session = self.handle.id(),
                        raw = %String::from_utf8_lossy(&raw),
                        "Corrupted frame"
                    );
                    if let Err(e) = self.write(&Message::text(payload::LIVENESS_PROBE)).await {
                        return SessionEnd::ConnectionLost(e.to_string());
                    }
                }
            }
        }
    }

    /// Runs one command. Returns `Some` if the session must end.
    async fn execute(&mut self, command: Command, content: &str) -> Option<SessionEnd> {
        let client = self.handle.client_id();
        debug!(session = self.handle.id(), command = %command, content, "Command received");

        let reply = match command {
            Command::LobbyExit => {
                if self.handle.mark_exited() {
                    self.delegate.exit(client);
                }
                return Some(SessionEnd::Exited);
            }
            Command::Ready | Command::Unready => {
                let ok = self.delegate.set_ready(client, command == Command::Ready);
                Message::text(payload::acceptance(ok))
            }
            Command::GameState => {
                let details = self.delegate.game_details().unwrap_or_default();
                Message::command(Command::GameState, details)
            }
            Command::Ping => Message::text(payload::PONG),
            other => {
                debug!(session = self.handle.id(), command = %other, "Ignoring command");
                return None;
            }
        };

        match self.write(&reply).await {
            Ok(()) => None,
            Err(e) => Some(SessionEnd::ConnectionLost(e.to_string())),
        }
    }

    /// Flushes what is already queued, unless evicted, then reports the close.
    async fn closed_by_server(&mut self, outbox: &mut mpsc::Receiver<String>) -> SessionEnd {
        let request = self
            .handle
            .close_request()
            .unwrap_or_else(|| CloseRequest::new(CloseStatus::GoingAway, "Lobby closed"));

        if request.status != CloseStatus::PolicyViolation {
            while let Ok(frame) = outbox.try_recv() {
                if self.write_frame(&frame).await.is_err() {
                    break;
                }
            }
        }
        SessionEnd::Closed(request)
    }

    async fn write(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.write_frame(&encode(msg)).await
    }

    async fn write_frame(&mut self, frame: &str) -> Result<(), SessionError> {
        match timeout(self.write_timeout, self.sink.send_frame(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Transport(e)),
            Err(_) => {
                warn!(session = self.handle.id(), "Write timed out");
                Err(SessionError::WriteTimeout)
            }
        }
    }
}

async fn reader_end(reader: &mut JoinHandle<ReadEnd>) -> SessionEnd {
    match reader.await {
        Ok(ReadEnd::PeerClosed) => SessionEnd::PeerClosed,
        Ok(ReadEnd::Failed(reason)) => SessionEnd::ConnectionLost(reason),
        Ok(ReadEnd::DispatchGone) => SessionEnd::ConnectionLost("Dispatch stopped".to_string()),
        Err(e) => SessionEnd::ConnectionLost(e.to_string()),
    }
}

// ============================================================================
// Reader task
// ============================================================================

async fn read_loop<S: FrameSource>(
    mut source: S,
    commands: mpsc::Sender<(Command, String)>,
    texts: mpsc::Sender<InboundText>,
    errors: mpsc::Sender<Vec<u8>>,
    gate: Arc<TurnGate>,
    session: SessionId,
) -> ReadEnd {
    loop {
        let frame = match source.recv_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(session, "Peer closed connection");
                return ReadEnd::PeerClosed;
            }
            Err(e) => {
                debug!(session, error = %e, "Transport read failed");
                return ReadEnd::Failed(e.to_string());
            }
        };

        let msg = if frame.len() > MAX_FRAME_SIZE {
            Message::corrupted(frame)
        } else {
            decode(&frame)
        };

        let routed = match msg {
            Message::Command { command, content } => commands.send((command, content)).await.is_ok(),
            Message::Corrupted { raw } => errors.send(raw).await.is_ok(),
            Message::Text { content } => {
                let text = InboundText {
                    content,
                    round: gate.current(),
                };
                match texts.try_send(text) {
                    Ok(()) => {}
                    Err(TrySendError::Full(text)) => {
                        warn!(session, content = %text.content, "Text inbox full, dropping message");
                    }
                    Err(TrySendError::Closed(text)) => {
                        debug!(session, content = %text.content, "No game listening, dropping text");
                    }
                }
                true
            }
        };

        if !routed {
            return ReadEnd::DispatchGone;
        }
    }
}
