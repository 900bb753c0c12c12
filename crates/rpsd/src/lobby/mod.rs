//! Lobby coordinator.
//!
//! A `Lobby` owns the roster, the lifecycle state and (while a game runs)
//! the `Game`. It drives the transitions:
//!
//! ```text
//!   CREATED ──(full + all ready, warm-up)──▶ IN_PROGRESS ──(winner)──▶ DISBANDED
//!      │                                         │
//!      └──(roster empties)──▶ DISBANDED ◀──(any departure)
//! ```
//!
//! Every background task a lobby starts (the warm-up/game task and the
//! per-participant choice forwarders) is spawned on the lobby's
//! `TaskTracker` and observes the lobby's `CancellationToken`, so
//! `disband` stops them and `shutdown` can wait for them.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` or indexing
//! - The roster lock is a `parking_lot::Mutex` and is never held across
//!   an `.await`

mod round;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use rps_core::{ClientId, Game, LobbyId, LobbyState, LobbySummary, Participant, PLAYERS};
use rps_protocol::{payload, Command, Message};

use crate::bus::{BroadcastBus, CloseRequest, TurnGate};
use crate::config::LobbySettings;
use crate::directory::DirectoryCommand;
use crate::session::{Connection, SessionConfig, SessionDelegate, SessionEnd, EXIT_REASON};
use crate::transport::{CloseStatus, FrameSink, Transport};

/// Errors surfaced to a client acting on a lobby.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby {lobby} is full (capacity: {capacity})")]
    Full { lobby: LobbyId, capacity: usize },

    #[error("Lobby {0} has already started")]
    AlreadyStarted(LobbyId),

    #[error("Lobby {0} has been disbanded")]
    Disbanded(LobbyId),

    #[error("Client {client} is not in lobby {lobby}")]
    NotAMember { lobby: LobbyId, client: ClientId },

    #[error("Client {client} is already in lobby {lobby}")]
    AlreadyJoined { lobby: LobbyId, client: ClientId },

    #[error("Client {client} already has a live session")]
    AlreadyConnected { client: ClientId },
}

/// Why a lobby was disbanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisbandReason {
    /// The game finished and the grace delay passed
    GameOver,
    /// A participant left while the game was running
    ParticipantLeft,
    /// The last participant left before the game started
    Empty,
    /// A participant did not submit a choice in time
    IdleTimeout,
    /// The server is shutting down
    Shutdown,
}

impl DisbandReason {
    fn close_request(self) -> CloseRequest {
        match self {
            Self::GameOver => CloseRequest::new(CloseStatus::Normal, "Game over"),
            Self::ParticipantLeft => {
                CloseRequest::new(CloseStatus::GoingAway, "Lobby disbanded: participant left")
            }
            Self::Empty => CloseRequest::new(CloseStatus::GoingAway, "Lobby disbanded: empty"),
            Self::IdleTimeout => {
                CloseRequest::new(CloseStatus::GoingAway, "Lobby disbanded: participant idle")
            }
            Self::Shutdown => CloseRequest::new(CloseStatus::GoingAway, "Server shutting down"),
        }
    }
}

impl fmt::Display for DisbandReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::GameOver => "game over",
            Self::ParticipantLeft => "participant left",
            Self::Empty => "empty",
            Self::IdleTimeout => "idle timeout",
            Self::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

struct LobbyInner {
    roster: Vec<Participant>,
    state: LobbyState,
    game: Option<Game>,
    /// Set between the all-ready check and the end of the warm-up
    starting: bool,
}

/// A named lobby and its coordinator.
pub struct Lobby {
    id: LobbyId,
    settings: LobbySettings,
    created_at: DateTime<Utc>,
    inner: Mutex<LobbyInner>,
    bus: BroadcastBus,
    turn: Arc<TurnGate>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    next_session: AtomicU64,
    directory: Option<mpsc::WeakSender<DirectoryCommand>>,
    this: Weak<Lobby>,
}

impl Lobby {
    /// Creates a standalone lobby.
    pub fn new(id: impl Into<LobbyId>, settings: LobbySettings) -> Arc<Self> {
        Self::build(id.into(), settings, None)
    }

    /// Creates a lobby that reports its disband to the directory.
    pub(crate) fn with_directory(
        id: LobbyId,
        settings: LobbySettings,
        directory: mpsc::WeakSender<DirectoryCommand>,
    ) -> Arc<Self> {
        Self::build(id, settings, Some(directory))
    }

    fn build(
        id: LobbyId,
        settings: LobbySettings,
        directory: Option<mpsc::WeakSender<DirectoryCommand>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            settings,
            created_at: Utc::now(),
            inner: Mutex::new(LobbyInner {
                roster: Vec::new(),
                state: LobbyState::Created,
                game: None,
                starting: false,
            }),
            bus: BroadcastBus::new(),
            turn: Arc::new(TurnGate::new()),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            next_session: AtomicU64::new(0),
            directory,
            this: this.clone(),
        })
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    pub fn id(&self) -> &LobbyId {
        &self.id
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn state(&self) -> LobbyState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_disbanded(&self) -> bool {
        self.state() == LobbyState::Disbanded
    }

    /// Roster in join order.
    pub fn roster(&self) -> Vec<Participant> {
        self.inner.lock().roster.clone()
    }

    pub fn has_participant(&self, client: &ClientId) -> bool {
        self.inner
            .lock()
            .roster
            .iter()
            .any(|p| &p.client_id == client)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.bus.len()
    }

    /// Current scores while a game runs.
    pub fn scores(&self) -> Option<[u32; PLAYERS]> {
        self.inner.lock().game.as_ref().map(Game::scores)
    }

    /// Directory listing entry.
    pub fn summary(&self) -> LobbySummary {
        let inner = self.inner.lock();
        LobbySummary {
            id: self.id.clone(),
            participants: inner.roster.len(),
            capacity: self.settings.capacity,
            state: inner.state,
            created_at: self.created_at,
        }
    }

    /// Game-details snapshot: scores and choice history per seat.
    pub fn game_details(&self) -> Option<String> {
        let inner = self.inner.lock();
        let game = inner.game.as_ref()?;
        let clients: Vec<ClientId> = inner.roster.iter().map(|p| p.client_id.clone()).collect();
        Some(payload::game_details(&clients, &game.records()))
    }

    /// Resolves once the lobby has been disbanded.
    pub async fn disbanded(&self) {
        self.cancel.cancelled().await;
    }

    // ========================================================================
    // Roster transitions
    // ========================================================================

    /// Adds `client` to the roster.
    ///
    /// # Errors
    /// Refused unless the lobby is CREATED, has room, and does not
    /// already list `client`.
    pub fn join(&self, client: ClientId) -> Result<(), LobbyError> {
        let roster = {
            let mut inner = self.inner.lock();
            match inner.state {
                LobbyState::Created => {}
                LobbyState::InProgress => return Err(LobbyError::AlreadyStarted(self.id.clone())),
                LobbyState::Disbanded => return Err(LobbyError::Disbanded(self.id.clone())),
            }
            if inner.roster.iter().any(|p| p.client_id == client) {
                return Err(LobbyError::AlreadyJoined {
                    lobby: self.id.clone(),
                    client,
                });
            }
            if inner.roster.len() >= self.settings.capacity {
                return Err(LobbyError::Full {
                    lobby: self.id.clone(),
                    capacity: self.settings.capacity,
                });
            }
            inner.roster.push(Participant::new(client.clone()));
            inner.roster.clone()
        };

        info!(lobby = %self.id, client_id = %client, "Participant joined");
        self.publish_lobby_state(&roster);
        Ok(())
    }

    /// Removes `client` from the roster and closes its session.
    ///
    /// Returns false if `client` was not listed (or the lobby is gone).
    pub fn exit(&self, client: &ClientId) -> bool {
        let (state, roster) = {
            let mut inner = self.inner.lock();
            if inner.state == LobbyState::Disbanded {
                return false;
            }
            let Some(pos) = inner.roster.iter().position(|p| &p.client_id == client) else {
                debug!(lobby = %self.id, client_id = %client, "Exit for unknown participant");
                return false;
            };
            inner.roster.remove(pos);
            (inner.state, inner.roster.clone())
        };

        self.bus
            .close_client(client, CloseRequest::new(CloseStatus::Normal, EXIT_REASON));
        info!(lobby = %self.id, client_id = %client, "Participant left");

        self.bus.publish(&Message::text(payload::exited(client)));
        self.publish_lobby_state(&roster);

        if state == LobbyState::InProgress {
            self.bus.publish(&Message::text(payload::GAME_ABANDONED));
            self.disband(DisbandReason::ParticipantLeft);
        } else if roster.is_empty() {
            self.disband(DisbandReason::Empty);
        }
        true
    }

    /// Marks `client` ready and attempts to start the game.
    pub fn set_ready(&self, client: &ClientId) -> bool {
        self.update_ready(client, true)
    }

    /// Clears `client`'s ready flag.
    pub fn set_unready(&self, client: &ClientId) -> bool {
        self.update_ready(client, false)
    }

    fn update_ready(&self, client: &ClientId, ready: bool) -> bool {
        let roster = {
            let mut inner = self.inner.lock();
            if inner.state != LobbyState::Created {
                debug!(lobby = %self.id, client_id = %client, "Readiness change outside CREATED");
                return false;
            }
            let Some(participant) = inner.roster.iter_mut().find(|p| &p.client_id == client)
            else {
                debug!(lobby = %self.id, client_id = %client, "Readiness change for unknown participant");
                return false;
            };
            participant.ready = ready;
            inner.roster.clone()
        };

        debug!(lobby = %self.id, client_id = %client, ready, "Readiness updated");
        self.publish_lobby_state(&roster);
        if ready {
            self.check_and_maybe_start();
        }
        true
    }

    /// Starts the warm-up if the roster is full and everyone is ready.
    fn check_and_maybe_start(&self) {
        let start = {
            let mut inner = self.inner.lock();
            let ready = inner.state == LobbyState::Created
                && !inner.starting
                && inner.roster.len() == self.settings.capacity
                && inner.roster.iter().all(|p| p.ready);
            if ready {
                inner.starting = true;
            }
            ready
        };
        if !start {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };

        info!(lobby = %self.id, warmup = ?self.settings.warmup(), "All participants ready");
        self.bus
            .publish(&Message::command(Command::GameStarting, ""));
        self.tasks.spawn(async move { this.start_after_warmup().await });
    }

    async fn start_after_warmup(self: Arc<Self>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.warmup()) => {}
        }

        let seats = {
            let mut inner = self.inner.lock();
            inner.starting = false;
            if inner.state != LobbyState::Created || inner.roster.len() != self.settings.capacity {
                info!(lobby = %self.id, "Game start aborted, roster changed during warm-up");
                return;
            }
            inner.state = LobbyState::InProgress;
            inner.game = Some(Game::new(self.settings.win_threshold));
            inner
                .roster
                .iter()
                .map(|p| p.client_id.clone())
                .collect::<Vec<_>>()
        };

        info!(lobby = %self.id, players = ?seats, "Game started");
        round::run_game(&self, seats).await;
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Binds `transport` to `client` for the lifetime of the connection.
    ///
    /// Returns how the session ended.
    ///
    /// # Errors
    /// Refused (and the transport closed with a policy violation) if the
    /// lobby is disbanded, `client` is not in the roster, or `client`
    /// already has a live session.
    pub async fn attach_session<T: Transport>(
        &self,
        transport: T,
        client: ClientId,
    ) -> Result<SessionEnd, LobbyError> {
        if let Err(e) = self.admit(&client) {
            warn!(lobby = %self.id, client_id = %client, error = %e, "Session refused");
            self.refuse(transport, &e).await;
            return Err(e);
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::new(
            id,
            client.clone(),
            transport,
            self.cancel.child_token(),
            Arc::clone(&self.turn),
            SessionConfig::from_settings(&self.settings),
        );
        self.bus.register(conn.handle());

        info!(lobby = %self.id, client_id = %client, session = id, "Session attached");
        self.bus
            .publish_except(&Message::text(payload::joined(&client)), &client);
        // Peers already saw this roster when the client joined
        self.bus.publish_to_session(
            &Message::command(
                Command::LobbyState,
                payload::lobby_state(&self.id, &self.roster()),
            ),
            id,
        );

        let welcome = Message::text(payload::welcome(&self.id));
        Ok(conn.run(&self.bus, self, Some(welcome)).await)
    }

    fn admit(&self, client: &ClientId) -> Result<(), LobbyError> {
        {
            let inner = self.inner.lock();
            if inner.state == LobbyState::Disbanded {
                return Err(LobbyError::Disbanded(self.id.clone()));
            }
            if !inner.roster.iter().any(|p| &p.client_id == client) {
                return Err(LobbyError::NotAMember {
                    lobby: self.id.clone(),
                    client: client.clone(),
                });
            }
        }
        if self.bus.session_for(client).is_some() {
            return Err(LobbyError::AlreadyConnected {
                client: client.clone(),
            });
        }
        Ok(())
    }

    async fn refuse<T: Transport>(&self, transport: T, error: &LobbyError) {
        let (_source, mut sink) = transport.split();
        let reason = error.to_string();
        if let Ok(Err(e)) = timeout(
            self.settings.write_timeout(),
            sink.close(CloseStatus::PolicyViolation, &reason),
        )
        .await
        {
            debug!(lobby = %self.id, error = %e, "Failed to close refused transport");
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Disbands the lobby: closes every session, cancels every task and
    /// leaves the directory.
    ///
    /// Idempotent; returns false if the lobby was already disbanded.
    pub fn disband(&self, reason: DisbandReason) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == LobbyState::Disbanded {
                return false;
            }
            inner.state = LobbyState::Disbanded;
            inner.starting = false;
            inner.game = None;
        }

        let closed = self.bus.close_all(reason.close_request());
        self.cancel.cancel();
        self.tasks.close();
        info!(lobby = %self.id, reason = %reason, sessions = closed, "Lobby disbanded");

        if let Some(directory) = self.directory.as_ref().and_then(mpsc::WeakSender::upgrade) {
            // A full queue only delays removal: the directory skips disbanded lobbies
            let _ = directory.try_send(DirectoryCommand::Remove {
                id: self.id.clone(),
            });
        }
        true
    }

    /// Disbands the lobby and waits for its background tasks to finish.
    pub async fn shutdown(&self) {
        self.disband(DisbandReason::Shutdown);
        self.tasks.wait().await;
    }

    // ========================================================================
    // Internals shared with the round loop
    // ========================================================================

    fn publish_lobby_state(&self, roster: &[Participant]) {
        self.bus.publish(&Message::command(
            Command::LobbyState,
            payload::lobby_state(&self.id, roster),
        ));
    }

    fn with_game<R>(&self, f: impl FnOnce(&mut Game) -> R) -> Option<R> {
        self.inner.lock().game.as_mut().map(f)
    }
}

impl SessionDelegate for Lobby {
    fn exit(&self, client: &ClientId) {
        Lobby::exit(self, client);
    }

    fn set_ready(&self, client: &ClientId, ready: bool) -> bool {
        self.update_ready(client, ready)
    }

    fn game_details(&self) -> Option<String> {
        Lobby::game_details(self)
    }
}

impl fmt::Debug for Lobby {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lobby")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sessions", &self.bus.len())
            .finish()
    }
}
