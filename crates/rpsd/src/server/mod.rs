//! WebSocket server for the rps daemon.
//!
//! The server:
//! - Listens on a TCP socket for WebSocket clients
//! - Spawns a task per connection that routes it into a lobby
//! - Disbands every lobby on shutdown via the directory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   GameServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │handle_connection│────▶│ DirectoryHandle │
//! │ (per client)    │     │                 │
//! └───────┬─────────┘     └─────────────────┘
//!         │ attach_session
//!         ▼
//! ┌─────────────────┐
//! │      Lobby      │
//! │ (bus + rounds)  │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept and connection errors are logged and allow continued operation

mod connection;

pub use connection::{handle_connection, ConnectionError, Route, RouteMethod};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::directory::DirectoryHandle;
use crate::session::SessionEnd;

/// WebSocket server bound to a local address.
pub struct GameServer {
    listener: TcpListener,

    /// Handle to the lobby directory
    directory: DirectoryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl GameServer {
    /// Binds the listener.
    ///
    /// Pass `127.0.0.1:0` to let the OS pick a port; read it back with
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        directory: DirectoryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            directory,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(|e| ServerError::Bind {
            addr: "<bound>".to_string(),
            error: e.to_string(),
        })
    }

    /// Accepts connections until the cancellation token fires, then shuts
    /// every lobby down.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Game server listening");
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(connection = conn_num, peer = %peer, "Accepted connection");
                            self.spawn_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, connection_number: u64) {
        let directory = self.directory.clone();

        tokio::spawn(async move {
            match handle_connection(stream, directory, connection_number).await {
                Ok(end) => log_session_end(connection_number, &end),
                Err(e) => debug!(connection = connection_number, error = %e, "Connection closed"),
            }
        });
    }

    async fn cleanup(&self) {
        let lobbies = self.directory.list().await;
        match serde_json::to_string(&lobbies) {
            Ok(json) => debug!(lobbies = %json, "Lobbies at shutdown"),
            Err(e) => debug!(error = %e, "Failed to serialize lobby listing"),
        }

        self.directory.shutdown().await;
        info!(lobbies = lobbies.len(), "Server cleanup complete");
    }
}

fn log_session_end(connection_number: u64, end: &SessionEnd) {
    match end {
        SessionEnd::ConnectionLost(cause) => {
            info!(connection = connection_number, cause = %cause, "Session lost its connection");
        }
        other => {
            let (status, reason) = other.close_frame();
            debug!(connection = connection_number, status = %status, reason, "Session finished");
        }
    }
}

/// Errors that can occur in server operations.
///
/// Per-connection failures never reach here; each connection task logs
/// its own `ConnectionError`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LobbySettings;
    use crate::directory::spawn_directory;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:80".to_string(),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:80"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let directory = spawn_directory(LobbySettings::default(), 4);
        let server = GameServer::bind("127.0.0.1:0", directory, CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let directory = spawn_directory(LobbySettings::default(), 4);
        let result = GameServer::bind("not-an-address", directory, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let directory = spawn_directory(LobbySettings::default(), 4);
        let cancel = CancellationToken::new();
        let server = GameServer::bind("127.0.0.1:0", directory, cancel.clone())
            .await
            .unwrap();

        let task = tokio::spawn(server.run());
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
