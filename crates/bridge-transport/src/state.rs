// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Lifecycle of a single `WsTransport`. See `transport::run_connected` for
/// the full transition table; this type only names the states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Tuning knobs for a `WsTransport`, matching the `connect.*` leaves of
/// `BridgeConfig`.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://` or `wss://` URL to dial. Unused for server-accepted
    /// transports constructed via `WsTransport::from_accepted`.
    pub url: String,
    pub reconnect: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// How long a caller to `send()` will wait for the writer task to pick
    /// up its frame before giving up with `SendBackpressure`. Mirrors the
    /// task timeout's own 300s default.
    pub send_deadline: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: true,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            send_deadline: Duration::from_secs(300),
        }
    }
}

/// Events a `WsTransport` emits to subscribers: `onMessage`,
/// `onDisconnect`, `onError`, `onReconnecting`.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One inbound text frame, not yet parsed into an `Envelope` — parsing
    /// and the resulting `Protocol` error handling live one layer up, in
    /// `bridge-core`, which owns the wire schema.
    Message(String),
    Disconnected,
    Error(String),
    Reconnecting { attempt: u32, max_attempts: u32 },
}
