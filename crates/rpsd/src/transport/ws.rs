//! WebSocket transport over TCP.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use super::{CloseStatus, FrameSink, FrameSource, Transport, TransportError};

type WsStream = WebSocketStream<TcpStream>;

/// An accepted WebSocket connection.
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    pub fn new(stream: WsStream) -> Self {
        Self { stream }
    }
}

impl Transport for WsTransport {
    type Source = WsSource;
    type Sink = WsSink;

    fn split(self) -> (WsSource, WsSink) {
        let (sink, stream) = self.stream.split();
        (WsSource { stream }, WsSink { sink })
    }
}

pub struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(Some(bytes.to_vec())),
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

pub struct WsSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::text(frame.to_string()))
            .await
            .map_err(map_send_error)
    }

    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(status.code()),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(map_send_error)?;
        self.sink.close().await.map_err(map_send_error)
    }
}

fn map_send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}
