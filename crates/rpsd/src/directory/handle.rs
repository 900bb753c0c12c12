//! Client interface for the directory actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `DirectoryError::ChannelClosed`

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use rps_core::{ClientId, LobbyId, LobbySummary};

use super::commands::{DirectoryCommand, DirectoryError};
use crate::lobby::Lobby;

/// Cheap-to-clone handle to the lobby directory.
#[derive(Clone)]
pub struct DirectoryHandle {
    sender: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    pub fn new(sender: mpsc::Sender<DirectoryCommand>) -> Self {
        Self { sender }
    }

    /// Creates a lobby.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::LobbyExists` if a live lobby has this id
    /// - `DirectoryError::DirectoryFull` at capacity
    /// - `DirectoryError::ChannelClosed` if the actor has shut down
    pub async fn create(&self, id: LobbyId) -> Result<Arc<Lobby>, DirectoryError> {
        let (tx, rx) = oneshot::channel();
        self.send(DirectoryCommand::Create { id, respond_to: tx })
            .await?;
        rx.await.map_err(|_| DirectoryError::ChannelClosed)?
    }

    /// Returns the live lobby with this id.
    pub async fn get(&self, id: LobbyId) -> Option<Arc<Lobby>> {
        let (tx, rx) = oneshot::channel();
        self.send(DirectoryCommand::Get { id, respond_to: tx })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Like [`get`](Self::get), but a missing lobby is an error.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::LobbyNotFound` if no live lobby has this id
    pub async fn require(&self, id: LobbyId) -> Result<Arc<Lobby>, DirectoryError> {
        match self.get(id.clone()).await {
            Some(lobby) => Ok(lobby),
            None => Err(DirectoryError::LobbyNotFound(id)),
        }
    }

    /// Summaries of every live lobby, oldest first.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn list(&self) -> Vec<LobbySummary> {
        let (tx, rx) = oneshot::channel();
        if self
            .send(DirectoryCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Finds the live lobby that lists `client`.
    pub async fn find_client(&self, client: ClientId) -> Option<Arc<Lobby>> {
        let (tx, rx) = oneshot::channel();
        self.send(DirectoryCommand::FindClient {
            client,
            respond_to: tx,
        })
        .await
        .ok()?;
        rx.await.ok().flatten()
    }

    /// Disbands every lobby and waits for their tasks to stop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .send(DirectoryCommand::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            return;
        }
        let lobbies = rx.await.unwrap_or_default();
        let count = lobbies.len();
        join_all(lobbies.iter().map(|lobby| lobby.shutdown())).await;
        info!(lobbies = count, "All lobbies shut down");
    }

    async fn send(&self, cmd: DirectoryCommand) -> Result<(), DirectoryError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| DirectoryError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (DirectoryHandle, mpsc::Receiver<DirectoryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (DirectoryHandle::new(cmd_tx), cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_create_sends_command() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            let _ = handle.create(LobbyId::new("arena")).await;
        });

        match rx.recv().await {
            Some(DirectoryCommand::Create { id, .. }) => assert_eq!(id.as_str(), "arena"),
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_actor() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert_eq!(
            handle.create(LobbyId::new("arena")).await.unwrap_err(),
            DirectoryError::ChannelClosed
        );
        assert!(handle.get(LobbyId::new("arena")).await.is_none());
        assert!(handle.list().await.is_empty());
        assert_eq!(
            handle.require(LobbyId::new("arena")).await.unwrap_err(),
            DirectoryError::LobbyNotFound(LobbyId::new("arena"))
        );
        handle.shutdown().await;
    }
}
