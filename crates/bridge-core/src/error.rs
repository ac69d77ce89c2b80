// SPDX-License-Identifier: Apache-2.0
use bridge_protocol::ProtocolError;
use bridge_transport::TransportError;
use thiserror::Error;
use uuid::Uuid;

/// Failure kinds `bridge-core` can surface.
///
/// Covers the `Configuration` / `Connection` / `Peer` / `Task` / `Context` /
/// `Protocol` / `Lifecycle` taxonomy. Request futures
/// (`delegate_task`, `request_context`) fail with exactly one terminal
/// variant: [`BridgeError::Timeout`], [`BridgeError::PeerDisconnected`],
/// [`BridgeError::BridgeShuttingDown`], [`BridgeError::HandlerError`], or
/// [`BridgeError::SendError`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("bridge already started")]
    AlreadyStarted,

    #[error("bridge is not started")]
    NotStarted,

    #[error("Not connected to any peer. Call connect() first.")]
    NoPeersConnected,

    #[error("peer not found: {0}")]
    PeerNotFound(Uuid),

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("bridge is shutting down")]
    BridgeShuttingDown,

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("send failed: {0}")]
    SendError(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl BridgeError {
    /// True for the handful of outcomes callers may legitimately treat as
    /// "the peer is gone", per the disconnect-mid-task testable property.
    pub fn is_disconnect_like(&self) -> bool {
        matches!(
            self,
            BridgeError::PeerDisconnected | BridgeError::BridgeShuttingDown
        )
    }
}
