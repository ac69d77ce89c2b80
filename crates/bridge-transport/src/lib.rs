// SPDX-License-Identifier: Apache-2.0
//! WebSocket transport for the agent bridge: one bidirectional connection
//! per `WsTransport`, with heartbeat, reconnect-with-backoff, and a FIFO
//! send queue that survives a reconnect.
//!
//! Works the same whether the socket was accepted from a listener or dialed
//! out as a client — both sides end up behind the same `WsTransport` handle.

mod client;
mod conn;
mod error;
mod server;
mod state;
mod transport;

pub use client::ClientWsConn;
pub use conn::{ConnEvent, PeerConn};
pub use error::TransportError;
pub use server::ServerWsConn;
pub use state::{TransportConfig, TransportEvent, TransportState};
pub use transport::WsTransport;
