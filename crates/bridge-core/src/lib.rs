// SPDX-License-Identifier: Apache-2.0
//! Peer registry, request correlation, routing and lifecycle management for
//! the agent bridge. `bridge-transport` supplies the wire; this crate
//! supplies the agent-facing API agents use to authenticate peers, route
//! messages, and run the bridge lifecycle:
//! `BridgeCore::start`/`stop`, `delegateTask`, `requestContext`,
//! `syncContext`, peer bookkeeping and handler registration.
//!
//! A `Router` dispatches inbound frames to registered handlers or forwards
//! them one hop; a `Correlator` tracks outstanding requests keyed by id; and
//! `BridgeCore` is the cheap-to-clone handle a caller actually holds.

mod auth;
mod autosync;
mod bridge;
mod config;
mod correlator;
mod error;
mod registry;
mod router;
mod status;

pub use auth::{AllowAll, AuthDecision, Authenticator, ConnectionAttempt, DenyAll};
pub use autosync::{AutoSyncHandle, ContextProviderFn, SyncFn};
pub use bridge::BridgeCore;
pub use config::{
    BridgeConfig, ClientTlsContext, ConnectConfig, ContextSharingConfig, ListenConfig, Mode,
    ServerTlsContext,
};
pub use correlator::{Correlator, CorrelatorError};
pub use error::BridgeError;
pub use registry::{PeerId, PeerInfo, PeerRecord, PeerRegistry};
pub use router::{
    BoxFuture, ContextHandlerFn, ContextReceivedHandlerFn, MessageHandlerFn, PeerEventHandlerFn,
    Router, TaskHandlerFn,
};
pub use status::StatusSnapshot;
