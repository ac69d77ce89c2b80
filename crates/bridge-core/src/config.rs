// SPDX-License-Identifier: Apache-2.0
//! `BridgeConfig` and its leaves, covering every recognized option
//! exactly. `bridge-core` never loads a config *file* — that stays external
//! to this crate. Leaves whose shape is plain data (`ContextSharingConfig`,
//! `Mode`) derive `serde::Deserialize` so a caller *may* feed them from a
//! parsed file; `ListenConfig`/`ConnectConfig` carry an opaque TLS context
//! and stay hand-built.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque TLS seam. Certificate/key loading is out of scope; the
/// core only ever asks "is there a TLS context or not" to pick `ws://` vs
/// `wss://`.
pub type ServerTlsContext = Arc<rustls::ServerConfig>;
pub type ClientTlsContext = Arc<rustls::ClientConfig>;

/// Which sockets this instance opens. `Host` requires `listen`, `Client`
/// requires `connect`, `Peer` requires at least one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Host,
    Client,
    Peer,
}

#[derive(Debug, Clone, Default)]
pub struct ListenConfig {
    pub port: u16,
    pub host: String,
    pub tls: Option<ServerTlsContext>,
}

impl ListenConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            port,
            host: host.into(),
            tls: None,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Takes precedence over `host`/`port` when set.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<ClientTlsContext>,
    pub reconnect: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl ConnectConfig {
    pub fn to_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let host = self.host.as_ref()?;
        let port = self.port?;
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        Some(format!("{scheme}://{host}:{port}"))
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            tls: None,
            reconnect: true,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSharingConfig {
    pub auto_sync: bool,
    pub sync_interval_ms: u64,
}

impl Default for ContextSharingConfig {
    fn default() -> Self {
        Self {
            auto_sync: false,
            sync_interval_ms: 5_000,
        }
    }
}

/// The full set of recognized config leaves, minus `listen.auth` (the
/// `Authenticator` is a trait object, supplied to `BridgeCore::new`
/// directly rather than carried in a `Deserialize`-able struct) and the
/// ContextEngine options (owned by `bridge-context`, composed by the
/// binary that wires both crates together).
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub mode: Option<Mode>,
    pub instance_name: String,
    pub listen: Option<ListenConfig>,
    pub connect: Option<ConnectConfig>,
    pub task_timeout: Option<Duration>,
    pub context_sharing: ContextSharingConfig,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<Mode, String> {
        let mode = self.mode.ok_or_else(|| "mode is required".to_string())?;
        match mode {
            Mode::Host if self.listen.is_none() => {
                Err("mode \"host\" requires a listen configuration".to_string())
            }
            Mode::Client if self.connect.is_none() => {
                Err("mode \"client\" requires a connect configuration".to_string())
            }
            Mode::Peer if self.listen.is_none() && self.connect.is_none() => {
                Err("mode \"peer\" requires at least one of listen or connect".to_string())
            }
            _ => Ok(mode),
        }
    }
}
