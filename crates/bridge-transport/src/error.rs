// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failure kinds a Transport instance can surface.
///
/// Mirrors the `Connection` kind from the bridge's error taxonomy. A
/// `TransportError` is about the connection itself — frame-level decode
/// failures live in `bridge_protocol::ProtocolError` and never reach here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("connection closed unexpectedly: {0}")]
    ClosedUnexpectedly(String),

    #[error("not connected; call connect() first")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("reconnect attempts exhausted after {0} tries")]
    MaxReconnectsExhausted(u32),

    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    #[error("send blocked by backpressure for more than {0}ms")]
    SendBackpressure(u64),
}
