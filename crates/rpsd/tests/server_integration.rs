//! End-to-end tests: a real server on an ephemeral port driven by
//! WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use rps_protocol::{encode, payload, Command, Message};
use rpsd::config::{LobbySettings, Timing};
use rpsd::directory::{spawn_directory, DirectoryHandle};
use rpsd::server::{GameServer, ServerError};

const STEP: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    directory: DirectoryHandle,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

async fn start_server() -> TestServer {
    let settings = LobbySettings::default().with_timing(Timing {
        warmup: Duration::from_millis(10),
        grace: Duration::from_millis(20),
        idle_timeout: None,
        write_timeout: Duration::from_secs(1),
    });
    let directory = spawn_directory(settings, 8);
    let cancel = CancellationToken::new();
    let server = GameServer::bind("127.0.0.1:0", directory.clone(), cancel.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.run());

    TestServer {
        addr,
        directory,
        cancel,
        task,
    }
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

fn text(content: &str) -> String {
    encode(&Message::text(content))
}

async fn send(ws: &mut Client, msg: &Message) {
    ws.send(WsMessage::text(encode(msg))).await.unwrap();
}

/// Skips frames until `expected` arrives.
async fn wait_for(ws: &mut Client, expected: &str) {
    loop {
        let frame = timeout(STEP, ws.next())
            .await
            .expect("timed out waiting for the server")
            .expect("connection ended")
            .unwrap();
        match frame {
            WsMessage::Text(t) if t.as_str() == expected => return,
            WsMessage::Close(close) => panic!("closed while waiting for {expected}: {close:?}"),
            _ => continue,
        }
    }
}

/// Skips frames until the close frame arrives; returns its code and reason.
async fn wait_for_close(ws: &mut Client) -> (u16, String) {
    loop {
        let frame = timeout(STEP, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("connection ended without a close frame")
            .unwrap();
        if let WsMessage::Close(close) = frame {
            let close = close.expect("close frame without a code");
            return (u16::from(close.code), close.reason.as_str().to_string());
        }
    }
}

#[tokio::test]
async fn test_full_game_over_websocket() {
    let server = start_server().await;

    let mut alice = connect(server.addr, "/create/arena/alice").await;
    wait_for(&mut alice, &text("Welcome to lobby arena")).await;

    let listing = server.directory.list().await;
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].to_string(), "arena,1,2,CREATED");

    let mut bob = connect(server.addr, "/join/arena/bob").await;
    wait_for(&mut bob, &text("Welcome to lobby arena")).await;
    wait_for(&mut alice, &text("JOINED bob")).await;

    let ready = Message::command(Command::Ready, "");
    send(&mut alice, &ready).await;
    wait_for(&mut alice, &text("true")).await;
    send(&mut bob, &ready).await;
    wait_for(&mut bob, &text("true")).await;

    for _ in 0..3 {
        wait_for(&mut alice, &text(payload::TURN_START)).await;
        wait_for(&mut bob, &text(payload::TURN_START)).await;

        send(&mut alice, &Message::text("0")).await;
        wait_for(&mut alice, &text(payload::CHOICE_ACCEPTED)).await;
        send(&mut bob, &Message::text("2")).await;
        wait_for(&mut bob, &text(payload::CHOICE_ACCEPTED)).await;

        wait_for(&mut alice, &text("Winner: 0")).await;
    }

    for ws in [&mut alice, &mut bob] {
        wait_for(ws, &text("Player 0 WON THE GAME!")).await;
        wait_for(ws, &text(payload::GAME_OVER)).await;
        assert_eq!(wait_for_close(ws).await, (1000, "Game over".to_string()));
    }

    server.cancel.cancel();
    timeout(STEP, server.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_route_is_closed_with_policy_violation() {
    let server = start_server().await;

    let mut ws = connect(server.addr, "/dance/arena/alice").await;
    let (code, reason) = wait_for_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert!(reason.contains("Invalid route"));

    server.cancel.cancel();
}

#[tokio::test]
async fn test_join_missing_lobby_is_refused() {
    let server = start_server().await;

    let mut ws = connect(server.addr, "/join/nowhere/alice").await;
    assert_eq!(
        wait_for_close(&mut ws).await,
        (1008, "lobby not found: nowhere".to_string())
    );

    server.cancel.cancel();
}

#[tokio::test]
async fn test_create_existing_lobby_is_refused() {
    let server = start_server().await;

    let mut alice = connect(server.addr, "/create/arena/alice").await;
    wait_for(&mut alice, &text("Welcome to lobby arena")).await;

    let mut bob = connect(server.addr, "/create/arena/bob").await;
    assert_eq!(
        wait_for_close(&mut bob).await,
        (1008, "lobby already exists: arena".to_string())
    );

    // Alice is unaffected
    send(&mut alice, &Message::command(Command::Ping, "")).await;
    wait_for(&mut alice, &text(payload::PONG)).await;

    server.cancel.cancel();
}

#[tokio::test]
async fn test_subscribe_requires_membership() {
    let server = start_server().await;

    let mut alice = connect(server.addr, "/create/arena/alice").await;
    wait_for(&mut alice, &text("Welcome to lobby arena")).await;

    let mut ghost = connect(server.addr, "/subscribe/arena/ghost").await;
    assert_eq!(
        wait_for_close(&mut ghost).await,
        (1008, "Client ghost is not in lobby arena".to_string())
    );

    server.cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_disbands_lobbies() {
    let server = start_server().await;

    let mut alice = connect(server.addr, "/create/arena/alice").await;
    wait_for(&mut alice, &text("Welcome to lobby arena")).await;

    server.cancel.cancel();
    assert_eq!(
        wait_for_close(&mut alice).await,
        (1001, "Server shutting down".to_string())
    );
    timeout(STEP, server.task).await.unwrap().unwrap().unwrap();
    assert!(server.directory.list().await.is_empty());
}
