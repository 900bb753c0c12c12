//! Per-connection handling: WebSocket handshake, routing, lobby attach.
//!
//! The handshake path selects what the connection does:
//!
//! - `/create/<lobby>/<client>` creates the lobby, joins it and attaches
//! - `/join/<lobby>/<client>` joins an existing lobby (unless already in
//!   its roster) and attaches
//! - `/subscribe/<lobby>/<client>` attaches to a lobby the client is
//!   already in
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Routing failures close the connection with a policy violation

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};

use rps_core::{ClientId, LobbyId};

use crate::directory::{DirectoryError, DirectoryHandle};
use crate::lobby::{Lobby, LobbyError};
use crate::session::SessionEnd;
use crate::transport::{CloseStatus, FrameSink, Transport, WsTransport};

/// Upper bound for sending the rejection close frame
const REJECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a connection asked for in its handshake path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Create,
    Join,
    Subscribe,
}

impl RouteMethod {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "join" => Some(Self::Join),
            "subscribe" => Some(Self::Subscribe),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Join => "join",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `/<method>/<lobby>/<client>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: RouteMethod,
    pub lobby: LobbyId,
    pub client: ClientId,
}

impl Route {
    /// Parses a handshake path.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::InvalidRoute` unless the path has exactly
    /// three non-empty segments and a known method.
    pub fn parse(path: &str) -> Result<Self, ConnectionError> {
        let invalid = || ConnectionError::InvalidRoute(path.to_string());

        let mut segments = path.trim_start_matches('/').split('/');
        let (Some(method), Some(lobby), Some(client), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };

        if lobby.is_empty() || client.is_empty() {
            return Err(invalid());
        }
        let method = RouteMethod::parse(method).ok_or_else(invalid)?;

        Ok(Self {
            method,
            lobby: LobbyId::new(lobby),
            client: ClientId::new(client),
        })
    }
}

/// Errors that end a connection before or instead of a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),
}

/// Runs one accepted TCP connection to completion.
///
/// Returns how the lobby session ended.
///
/// # Errors
///
/// Handshake, routing, directory and lobby failures. Once the WebSocket
/// is up, every failure is also reported to the peer as a close frame
/// with a policy violation.
pub async fn handle_connection(
    stream: TcpStream,
    directory: DirectoryHandle,
    connection_number: u64,
) -> Result<SessionEnd, ConnectionError> {
    let mut path = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let ws = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    let transport = WsTransport::new(ws);

    debug!(connection = connection_number, path = %path, "WebSocket handshake complete");

    let route = match Route::parse(&path) {
        Ok(route) => route,
        Err(e) => {
            reject(transport, &e).await;
            return Err(e);
        }
    };

    let lobby = match enter_lobby(&directory, &route).await {
        Ok(lobby) => lobby,
        Err(e) => {
            warn!(
                connection = connection_number,
                method = %route.method,
                lobby = %route.lobby,
                client_id = %route.client,
                error = %e,
                "Connection refused"
            );
            reject(transport, &e).await;
            return Err(e);
        }
    };

    info!(
        connection = connection_number,
        method = %route.method,
        lobby = %route.lobby,
        client_id = %route.client,
        "Client routed to lobby"
    );

    // The lobby closes the transport itself when it refuses the session
    Ok(lobby.attach_session(transport, route.client).await?)
}

async fn enter_lobby(
    directory: &DirectoryHandle,
    route: &Route,
) -> Result<Arc<Lobby>, ConnectionError> {
    match route.method {
        RouteMethod::Create => {
            let lobby = directory.create(route.lobby.clone()).await?;
            lobby.join(route.client.clone())?;
            Ok(lobby)
        }
        RouteMethod::Join => {
            let lobby = directory.require(route.lobby.clone()).await?;
            if !lobby.has_participant(&route.client) {
                lobby.join(route.client.clone())?;
            }
            Ok(lobby)
        }
        RouteMethod::Subscribe => Ok(directory.require(route.lobby.clone()).await?),
    }
}

async fn reject(transport: WsTransport, error: &ConnectionError) {
    let (_source, mut sink) = transport.split();
    let reason = error.to_string();
    match timeout(REJECT_TIMEOUT, sink.close(CloseStatus::PolicyViolation, &reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to close rejected connection"),
        Err(_) => debug!("Timed out closing rejected connection"),
    }
}
