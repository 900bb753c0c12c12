//! Directory actor commands and errors.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use rps_core::{ClientId, LobbyId, LobbySummary};

use crate::lobby::Lobby;

// ============================================================================
// Directory Commands
// ============================================================================

/// Commands sent to the directory actor.
///
/// Request-style commands carry a oneshot `respond_to`; `Remove` is
/// fire-and-forget because lobbies send it from synchronous code.
#[derive(Debug)]
pub enum DirectoryCommand {
    /// Create a new lobby.
    ///
    /// # Errors
    /// - `DirectoryError::LobbyExists` if a live lobby has this id
    /// - `DirectoryError::DirectoryFull` if at maximum capacity
    Create {
        id: LobbyId,
        respond_to: oneshot::Sender<Result<Arc<Lobby>, DirectoryError>>,
    },

    /// Look up a live lobby by id.
    Get {
        id: LobbyId,
        respond_to: oneshot::Sender<Option<Arc<Lobby>>>,
    },

    /// Summaries of every live lobby, oldest first.
    List {
        respond_to: oneshot::Sender<Vec<LobbySummary>>,
    },

    /// Find the live lobby that lists `client` in its roster.
    FindClient {
        client: ClientId,
        respond_to: oneshot::Sender<Option<Arc<Lobby>>>,
    },

    /// Drop a disbanded lobby. Sent by the lobby itself.
    Remove { id: LobbyId },

    /// Hand every lobby back for shutdown and empty the directory.
    Shutdown {
        respond_to: oneshot::Sender<Vec<Arc<Lobby>>>,
    },
}

// ============================================================================
// Directory Errors
// ============================================================================

/// Errors returned by directory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// A live lobby already uses this id.
    #[error("lobby already exists: {0}")]
    LobbyExists(LobbyId),

    /// No live lobby has this id.
    #[error("lobby not found: {0}")]
    LobbyNotFound(LobbyId),

    /// The directory holds its maximum number of lobbies.
    #[error("directory is full (max: {max} lobbies)")]
    DirectoryFull { max: usize },

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DirectoryError::LobbyExists(LobbyId::new("arena")).to_string(),
            "lobby already exists: arena"
        );
        assert_eq!(
            DirectoryError::DirectoryFull { max: 3 }.to_string(),
            "directory is full (max: 3 lobbies)"
        );
    }
}
