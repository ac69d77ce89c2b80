// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use bridge_context::{ContextEngine, ContextEngineConfig};
use bridge_core::{
    AllowAll, BridgeConfig, BridgeCore, ConnectConfig, ContextSharingConfig, ListenConfig, Mode,
};
use cli::{Cli, ModeArg};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = build_config(&cli)?;
    let bridge = BridgeCore::new(config, Arc::new(AllowAll))
        .context("invalid bridge configuration")?;

    let context_engine = Arc::new(ContextEngine::new(ContextEngineConfig::new(&cli.context_root)));
    register_handlers(&bridge, context_engine.clone()).await;

    bridge.start().await.context("failed to start bridge")?;
    tracing::info!(
        mode = ?bridge.mode(),
        instance = bridge.instance_name(),
        "agent-bridge started"
    );

    if cli.auto_sync_interval_ms.is_some() {
        bridge.start_auto_sync(None).await;
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    bridge.stop().await.context("failed to stop bridge cleanly")?;
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mode: Mode = cli.mode.into();

    let listen = cli.listen_port.map(|port| ListenConfig::new(cli.listen_host.clone(), port));
    let connect = cli.connect_url.as_ref().map(|url| ConnectConfig {
        url: Some(url.clone()),
        host: None,
        port: None,
        tls: None,
        reconnect: !cli.no_reconnect,
        ..ConnectConfig::default()
    });

    if matches!(cli.mode, ModeArg::Host) && listen.is_none() {
        anyhow::bail!("mode \"host\" requires --listen-port");
    }
    if matches!(cli.mode, ModeArg::Client) && connect.is_none() {
        anyhow::bail!("mode \"client\" requires --connect-url");
    }

    Ok(BridgeConfig {
        mode: Some(mode),
        instance_name: cli.instance_name.clone(),
        listen,
        connect,
        task_timeout: Some(std::time::Duration::from_millis(cli.task_timeout_ms)),
        context_sharing: ContextSharingConfig {
            auto_sync: cli.auto_sync_interval_ms.is_some(),
            sync_interval_ms: cli.auto_sync_interval_ms.unwrap_or(5_000),
        },
    })
}

/// Wires the CLI's own context engine up as this instance's context-request
/// handler, so a peer's `requestContext` against us is answered with real
/// ranked excerpts of `--context-root` rather than failing with "no handler
/// registered on peer".
async fn register_handlers(bridge: &BridgeCore, engine: Arc<ContextEngine>) {
    bridge
        .on_context_requested(Arc::new(move |query: String| {
            let engine = engine.clone();
            Box::pin(async move {
                engine
                    .query(&query, None)
                    .map_err(|e| e.to_string())
            })
        }))
        .await;

    bridge
        .on_peer_connected(Arc::new(|peer_id| {
            tracing::info!(%peer_id, "peer connected");
        }))
        .await;
    bridge
        .on_peer_disconnected(Arc::new(|peer_id| {
            tracing::info!(%peer_id, "peer disconnected");
        }))
        .await;
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}
