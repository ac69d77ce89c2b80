// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use tracing::debug;

use crate::conn::{ConnEvent, PeerConn};
use crate::error::TransportError;

/// A server-accepted WebSocket, as used when `mode = host` or `mode = peer`
/// listens on `listen.port` and a remote instance dials in.
pub struct ServerWsConn {
    socket: WebSocket,
}

impl ServerWsConn {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl PeerConn for ServerWsConn {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(ConnEvent::Text(text))),
                Some(Ok(Message::Pong(_))) => return Some(Ok(ConnEvent::Pong)),
                Some(Ok(Message::Ping(data))) => {
                    if self.socket.send(Message::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Message::Binary(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    debug!("server socket recv error: {e}");
                    return Some(Err(TransportError::ClosedUnexpectedly(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: String) {
        let frame = CloseFrame {
            code: if code == 1000 { close_code::NORMAL } else { code },
            reason: reason.into(),
        };
        let _ = self.socket.send(Message::Close(Some(frame))).await;
    }
}
