// SPDX-License-Identifier: Apache-2.0
//! Argument parsing for the `agent-bridge` binary: a thin `clap` front end
//! over `bridge-core::BridgeConfig` and `bridge-context::ContextEngineConfig`.
//! Config *file* loading stays out of scope — every option here is
//! a CLI flag or environment variable, never a parsed YAML/TOML document.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "agent-bridge", version, about = "Bidirectional message bridge for cooperating agents")]
pub struct Cli {
    /// Which sockets this instance opens.
    #[arg(long, value_enum, env = "BRIDGE_MODE")]
    pub mode: ModeArg,

    /// Name this instance reports as `source` on every outgoing message.
    #[arg(long, env = "BRIDGE_INSTANCE_NAME", default_value = "agent-bridge")]
    pub instance_name: String,

    /// Host to bind when `mode` is `host` or `peer`.
    #[arg(long, env = "BRIDGE_LISTEN_HOST", default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port to bind when `mode` is `host` or `peer`.
    #[arg(long, env = "BRIDGE_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// URL to dial when `mode` is `client` or `peer`, e.g. `ws://127.0.0.1:7700`.
    #[arg(long, env = "BRIDGE_CONNECT_URL")]
    pub connect_url: Option<String>,

    /// Disable automatic reconnect on the client transport.
    #[arg(long)]
    pub no_reconnect: bool,

    /// Default per-task timeout in milliseconds, used when a `TaskRequest`
    /// carries none of its own.
    #[arg(long, default_value_t = 300_000)]
    pub task_timeout_ms: u64,

    /// Root directory the context engine walks and ranks.
    #[arg(long, default_value = ".")]
    pub context_root: PathBuf,

    /// Broadcast a context sync every `sync_interval_ms` (disabled unless set).
    #[arg(long)]
    pub auto_sync_interval_ms: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace); default is info.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Host,
    Client,
    Peer,
}

impl From<ModeArg> for bridge_core::Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Host => bridge_core::Mode::Host,
            ModeArg::Client => bridge_core::Mode::Client,
            ModeArg::Peer => bridge_core::Mode::Peer,
        }
    }
}
