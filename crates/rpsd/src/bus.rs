//! Per-lobby broadcast bus.
//!
//! The bus is a registry of live sessions. Every outbound message is
//! encoded once and offered to each target session's bounded outbox with
//! `try_send`, so a publisher never waits on a connection. A session
//! whose outbox is full is evicted on the spot: its close reason is set
//! to policy violation, its cancellation token fires, and it leaves the
//! registry before anything else is delivered.
//!
//! ```text
//!  Lobby ──publish──▶ BroadcastBus ──try_send──▶ outbox ──▶ dispatch loop ──▶ socket
//!                          │
//!                          └── full outbox ──▶ evict (PolicyViolation)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` or indexing
//! - The registry lock is never held across an `.await`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rps_core::ClientId;
use rps_protocol::{encode, Message};

use crate::transport::CloseStatus;

/// Session identifier, unique within a lobby.
pub type SessionId = u64;

/// Close reason given to an evicted session.
pub const EVICTION_REASON: &str = "Connection too slow to keep up with messages";

/// Why a session is being closed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub status: CloseStatus,
    pub reason: String,
}

impl CloseRequest {
    pub fn new(status: CloseStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Turn gate
// ============================================================================

/// Which round, if any, is taking choices.
///
/// Shared by a lobby's sessions and its round loop. A session reader
/// stamps each inbound text with the round open at the moment the text
/// is read, so a choice read before a round opens can never count
/// toward it.
#[derive(Debug, Default)]
pub struct TurnGate {
    /// 0 when closed, otherwise the open round plus one
    open: AtomicUsize,
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, round: usize) {
        self.open.store(round.saturating_add(1), Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(0, Ordering::SeqCst);
    }

    /// The round taking choices right now.
    pub fn current(&self) -> Option<usize> {
        self.open.load(Ordering::SeqCst).checked_sub(1)
    }
}

/// Text read from a client, stamped with the round open when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub content: String,
    pub round: Option<usize>,
}

// ============================================================================
// Session handle
// ============================================================================

/// The shared face of a connection session.
///
/// Held by the bus (for delivery) and by the coordinator (to reach the
/// session's text inbox). The connection task owns the other ends.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    client_id: ClientId,
    outbox: mpsc::Sender<String>,
    text_inbox: Mutex<Option<mpsc::Receiver<InboundText>>>,
    cancel: CancellationToken,
    close: Mutex<Option<CloseRequest>>,
    exited: AtomicBool,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        client_id: ClientId,
        outbox: mpsc::Sender<String>,
        text_inbox: mpsc::Receiver<InboundText>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            client_id,
            outbox,
            text_inbox: Mutex::new(Some(text_inbox)),
            cancel,
            close: Mutex::new(None),
            exited: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Token that fires when the session must stop.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Takes the inbound text channel.
    ///
    /// The coordinator takes it once, when the game starts.
    pub fn take_text_inbox(&self) -> Option<mpsc::Receiver<InboundText>> {
        self.text_inbox.lock().take()
    }

    /// Asks the session to close. The first request wins.
    ///
    /// Returns true if this call set the close reason.
    pub fn request_close(&self, request: CloseRequest) -> bool {
        let first = {
            let mut close = self.close.lock();
            if close.is_none() {
                *close = Some(request);
                true
            } else {
                false
            }
        };
        self.cancel.cancel();
        first
    }

    /// Returns the recorded close request, if any.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close.lock().clone()
    }

    /// True if the session was dropped for falling behind.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.close
            .lock()
            .as_ref()
            .is_some_and(|c| c.status == CloseStatus::PolicyViolation)
    }

    /// Claims the participant-exit for this session.
    ///
    /// Returns true exactly once; every later call returns false.
    pub fn mark_exited(&self) -> bool {
        self.exited
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_deliver(&self, frame: String) -> Result<(), TrySendError<String>> {
        self.outbox.try_send(frame)
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Registry of live sessions with non-blocking fan-out.
#[derive(Debug, Default)]
pub struct BroadcastBus {
    sessions: Mutex<Vec<Arc<SessionHandle>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Re-registering the same id is a no-op.
    pub fn register(&self, session: Arc<SessionHandle>) {
        let mut sessions = self.sessions.lock();
        if sessions.iter().any(|s| s.id() == session.id()) {
            return;
        }
        debug!(
            session = session.id(),
            client_id = %session.client_id(),
            "Session registered"
        );
        sessions.push(session);
    }

    /// Removes a session. Returns false if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id() != id);
        let removed = sessions.len() != before;
        if removed {
            debug!(session = id, "Session unregistered");
        }
        removed
    }

    /// Returns the live session for `client`, if any.
    pub fn session_for(&self, client: &ClientId) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.client_id() == client)
            .cloned()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Delivers `msg` to every session. Returns the number reached.
    pub fn publish(&self, msg: &Message) -> usize {
        self.deliver(msg, |_| true)
    }

    /// Delivers `msg` to every session except those of `client`.
    pub fn publish_except(&self, msg: &Message, client: &ClientId) -> usize {
        self.deliver(msg, |s| s.client_id() != client)
    }

    /// Delivers `msg` to one session. Returns false if it was not reached.
    pub fn publish_to_session(&self, msg: &Message, id: SessionId) -> bool {
        self.deliver(msg, |s| s.id() == id) > 0
    }

    /// Removes `client`'s session and asks it to close.
    ///
    /// Used on the exit path, so the participant-exit is claimed here and
    /// the closing session does not trigger it a second time.
    pub fn close_client(&self, client: &ClientId, request: CloseRequest) -> bool {
        let session = {
            let mut sessions = self.sessions.lock();
            let pos = sessions.iter().position(|s| s.client_id() == client);
            pos.map(|i| sessions.remove(i))
        };
        match session {
            Some(session) => {
                session.mark_exited();
                session.request_close(request);
                true
            }
            None => false,
        }
    }

    /// Removes every session and asks each to close. Returns how many.
    pub fn close_all(&self, request: CloseRequest) -> usize {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in &sessions {
            session.request_close(request.clone());
        }
        sessions.len()
    }

    fn deliver(&self, msg: &Message, filter: impl Fn(&SessionHandle) -> bool) -> usize {
        let frame = encode(msg);
        let mut delivered = 0;
        let mut evicted = Vec::new();

        {
            let mut sessions = self.sessions.lock();
            sessions.retain(|session| {
                if !filter(session) {
                    return true;
                }
                match session.try_deliver(frame.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        evicted.push(Arc::clone(session));
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(session = session.id(), "Dropping session with closed outbox");
                        false
                    }
                }
            });
        }

        for session in evicted {
            warn!(
                session = session.id(),
                client_id = %session.client_id(),
                "Evicting slow session"
            );
            session.request_close(CloseRequest::new(
                CloseStatus::PolicyViolation,
                EVICTION_REASON,
            ));
        }

        delivered
    }
}
