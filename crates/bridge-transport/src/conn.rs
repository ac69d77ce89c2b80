// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::error::TransportError;

/// One inbound event from a `PeerConn`. Inbound `Ping`s are answered with a
/// `Pong` transparently by the implementation and never surfaced here —
/// only the `Pong` replies to *our own* pings are, so the heartbeat loop can
/// tell a live connection from a stalled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    Text(String),
    Pong,
}

/// Unifies a server-accepted and a client-dialed WebSocket behind one
/// interface, so the rest of the transport layer never has to know which
/// side opened the connection. A peer record just owns a `Box<dyn PeerConn>`
/// regardless of provenance.
#[async_trait]
pub trait PeerConn: Send {
    /// Writes one text frame. Returns once the frame has been handed to the
    /// underlying socket, not once it has been acknowledged.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Sends a WebSocket ping control frame, used by the heartbeat loop.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Reads the next event, or `None` once the peer has closed the
    /// connection (gracefully or otherwise).
    async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>>;

    /// Sends a close frame with the given code and reason, then shuts the
    /// connection down. Idempotent: closing an already-closed connection is
    /// a no-op.
    async fn close(&mut self, code: u16, reason: String);
}
