// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::CloseFrame,
    tungstenite::Message as WsMessage,
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::conn::{ConnEvent, PeerConn};
use crate::error::TransportError;

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A client-dialed WebSocket, as used when `mode = client` or `mode = peer`
/// connects out to another instance's `listen` address.
pub struct ClientWsConn {
    socket: ClientSocket,
}

impl ClientWsConn {
    /// Dials `url` (`ws://` or `wss://`, scheme chosen by the caller based on
    /// whether a TLS context is configured — see connection scheme).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Refused(e.to_string()))?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl PeerConn for ClientWsConn {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.socket
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>> {
        loop {
            match self.socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(ConnEvent::Text(text))),
                Some(Ok(WsMessage::Pong(_))) => return Some(Ok(ConnEvent::Pong)),
                Some(Ok(WsMessage::Ping(data))) => {
                    if self.socket.send(WsMessage::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(WsMessage::Binary(_))) | Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Err(e)) => {
                    debug!("client socket recv error: {e}");
                    return Some(Err(TransportError::ClosedUnexpectedly(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: String) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        let _ = self.socket.close(Some(frame)).await;
    }
}
