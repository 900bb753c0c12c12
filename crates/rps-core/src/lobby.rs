//! Lobby domain entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Free-text identifier a client presents when joining a lobby.
///
/// Opaque and stable for the lifetime of the client; unique within a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new ClientId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique lobby name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(String);

impl LobbyId {
    /// Creates a new LobbyId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LobbyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LobbyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Roster
// ============================================================================

/// A roster entry. Owned by the lobby; sessions only refer to it by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub client_id: ClientId,
    pub ready: bool,
}

impl Participant {
    /// Creates a participant that has not declared readiness yet.
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            ready: false,
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lobby lifecycle state.
///
/// `Created` → `InProgress` → `Disbanded`. `Disbanded` is terminal; a
/// lobby may also go straight from `Created` to `Disbanded` when its
/// roster empties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyState {
    Created,
    InProgress,
    Disbanded,
}

impl LobbyState {
    /// Returns the wire/display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Disbanded => "DISBANDED",
        }
    }

    /// Returns true once the lobby can no longer be used.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disbanded)
    }
}

impl fmt::Display for LobbyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only lobby summary used for directory listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub id: LobbyId,
    pub participants: usize,
    pub capacity: usize,
    pub state: LobbyState,
    pub created_at: DateTime<Utc>,
}

impl LobbySummary {
    /// Returns true if another participant could join right now.
    #[must_use]
    pub fn has_space(&self) -> bool {
        self.state == LobbyState::Created && self.participants < self.capacity
    }
}

/// Listing format: `id,count,capacity,STATE`.
impl fmt::Display for LobbySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.id, self.participants, self.capacity, self.state
        )
    }
}
