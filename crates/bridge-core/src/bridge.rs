// SPDX-License-Identifier: Apache-2.0
//! `BridgeCore` — wires Transport, Router and Correlator together and
//! exposes the public RPC-style API agents use to connect, delegate tasks,
//! request context, and broadcast messages.
//!
//! Build once, get a cheap-clone handle, call `start()`. There is no single
//! event loop to drive by hand — `start()` itself spawns the listener-accept
//! loop, the client dial + reader task, and (later) auto-sync, each
//! independently cancellable from `stop()`.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use bridge_protocol::{Context, Envelope, TaskRequest, TaskResult};
use bridge_transport::{PeerConn, ServerWsConn, TransportConfig, TransportEvent, WsTransport};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Authenticator, ConnectionAttempt};
use crate::autosync::{AutoSyncHandle, ContextProviderFn};
use crate::config::{BridgeConfig, Mode};
use crate::correlator::{Correlator, CorrelatorError};
use crate::error::BridgeError;
use crate::registry::{PeerId, PeerInfo, PeerRecord, PeerRegistry};
use crate::router::{
    BoxFuture, ContextHandlerFn, ContextReceivedHandlerFn, MessageHandlerFn, PeerEventHandlerFn,
    Router, TaskHandlerFn,
};
use crate::status::StatusSnapshot;

struct Inner {
    instance_name: String,
    mode: Mode,
    config: BridgeConfig,
    registry: PeerRegistry,
    correlator: Arc<Correlator>,
    router: Router,
    authenticator: Arc<dyn Authenticator>,
    started: AtomicBool,
    shutting_down: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    autosync: Mutex<Option<AutoSyncHandle>>,
}

/// Cheap-to-clone handle to the bridge. Clones share the same underlying
/// state and background tasks.
#[derive(Clone)]
pub struct BridgeCore {
    inner: Arc<Inner>,
}

impl BridgeCore {
    /// Validates `config` and builds the bridge. Does not open any socket
    /// — call [`Self::start`] for that.
    pub fn new(config: BridgeConfig, authenticator: Arc<dyn Authenticator>) -> Result<Self, BridgeError> {
        let mode = config.validate().map_err(BridgeError::InvalidConfiguration)?;
        let instance_name = config.instance_name.clone();
        let correlator = Arc::new(Correlator::new());
        let router = Router::new(correlator.clone(), instance_name.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                instance_name,
                mode,
                config,
                registry: PeerRegistry::new(),
                correlator,
                router,
                authenticator,
                started: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                listener_task: Mutex::new(None),
                autosync: Mutex::new(None),
            }),
        })
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn instance_name(&self) -> &str {
        &self.inner.instance_name
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Opens the sockets this instance's mode requires. Fails atomically:
    /// a failed `start()` leaves no partially-opened socket behind.
    pub async fn start(&self) -> Result<(), BridgeError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            self.inner.started.store(true, Ordering::SeqCst);
            return Err(BridgeError::AlreadyStarted);
        }
        self.inner.shutting_down.store(false, Ordering::SeqCst);

        if let Err(e) = self.start_inner().await {
            self.cleanup().await;
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn start_inner(&self) -> Result<(), BridgeError> {
        self.inner
            .config
            .validate()
            .map_err(BridgeError::InvalidConfiguration)?;

        match self.inner.mode {
            Mode::Host => self.start_listener().await?,
            Mode::Client => self.start_client().await?,
            Mode::Peer => {
                if self.inner.config.listen.is_some() {
                    self.start_listener().await?;
                }
                if self.inner.config.connect.is_some() {
                    self.start_client().await?;
                }
            }
        }
        Ok(())
    }

    /// Rolls back whatever `start_inner` managed to bring up before it
    /// failed, or tears everything down as part of `stop()`.
    async fn cleanup(&self) {
        if let Some(task) = self.inner.listener_task.lock().await.take() {
            task.abort();
        }
        for peer in self.inner.registry.iter_all().await {
            peer.transport
                .disconnect_with(1000, "Bridge stopping")
                .await;
        }
        self.inner.registry.clear().await;
    }

    /// Idempotent; a second call is a no-op that returns success.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        self.stop_auto_sync().await;
        self.inner.correlator.fail_all();
        self.cleanup().await;

        self.inner.shutting_down.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), BridgeError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::BridgeShuttingDown);
        }
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(BridgeError::NotStarted);
        }
        Ok(())
    }

    // ── Listener (host / peer) ──────────────────────────────────────────────

    async fn start_listener(&self) -> Result<(), BridgeError> {
        let listen = self
            .inner
            .config
            .listen
            .clone()
            .ok_or_else(|| BridgeError::InvalidConfiguration("listen configuration missing".into()))?;

        let bind_addr = listen.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| BridgeError::InvalidConfiguration(format!("failed to bind {bind_addr}: {e}")))?;

        let app = axum::Router::new()
            .fallback(get(accept_handler))
            .with_state(self.clone());

        let task = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                warn!("bridge listener task ended: {e}");
            }
        });

        *self.inner.listener_task.lock().await = Some(task);
        info!(addr = %bind_addr, "bridge listening");
        Ok(())
    }

    /// Runs the authenticator, then wraps an accepted socket in a
    /// server-side `WsTransport` and registers the peer. Rejected
    /// connections are closed with code `4001` and the authenticator's
    /// reason.
    async fn accept_connection(&self, socket: axum::extract::ws::WebSocket, client_ip: Option<IpAddr>) {
        let attempt = ConnectionAttempt {
            client_ip,
            path: "/".to_string(),
        };
        let mut conn = ServerWsConn::new(socket);
        match self.inner.authenticator.authenticate(attempt).await {
            crate::auth::AuthDecision::Reject { reason } => {
                warn!(%reason, "rejecting incoming bridge connection");
                conn.close(4001, reason).await;
                return;
            }
            crate::auth::AuthDecision::Accept { .. } => {}
        }

        let transport_config = TransportConfig {
            send_deadline: self
                .inner
                .config
                .task_timeout
                .unwrap_or(Duration::from_secs(300)),
            ..TransportConfig::default()
        };
        let transport = WsTransport::from_accepted(transport_config, Box::new(conn));
        self.register_peer(Uuid::new_v4(), "client", transport).await;
    }

    // ── Client dial (client / peer) ─────────────────────────────────────────

    async fn start_client(&self) -> Result<(), BridgeError> {
        let connect = self
            .inner
            .config
            .connect
            .clone()
            .ok_or_else(|| BridgeError::InvalidConfiguration("connect configuration missing".into()))?;
        let url = connect.to_url().ok_or_else(|| {
            BridgeError::InvalidConfiguration("connect requires url or host+port".into())
        })?;

        let transport_config = TransportConfig {
            url,
            reconnect: connect.reconnect,
            reconnect_interval: connect.reconnect_interval,
            max_reconnect_attempts: connect.max_reconnect_attempts,
            send_deadline: self
                .inner
                .config
                .task_timeout
                .unwrap_or(Duration::from_secs(300)),
            ..TransportConfig::default()
        };
        let transport = WsTransport::dial(transport_config).await?;
        self.register_peer(Uuid::new_v4(), "server", transport).await;
        Ok(())
    }

    /// Dials an additional peer at runtime.
    pub async fn connect_to_peer(&self, url: impl Into<String>) -> Result<PeerId, BridgeError> {
        self.ensure_started()?;
        let transport_config = TransportConfig {
            send_deadline: self
                .inner
                .config
                .task_timeout
                .unwrap_or(Duration::from_secs(300)),
            ..TransportConfig::new(url)
        };
        let transport = WsTransport::dial(transport_config).await?;
        let peer_id = Uuid::new_v4();
        self.register_peer(peer_id, "server", transport).await;
        Ok(peer_id)
    }

    /// Disconnects and removes one peer. The second call for the same id
    /// fails with `PeerNotFound`.
    pub async fn disconnect_from_peer(&self, peer_id: PeerId) -> Result<(), BridgeError> {
        match self.inner.registry.remove(peer_id).await {
            Some(peer) => {
                peer.transport
                    .disconnect_with(1000, "Disconnect requested")
                    .await;
                Ok(())
            }
            None => Err(BridgeError::PeerNotFound(peer_id)),
        }
    }

    // ── Peer registration & reader loop ──────────────────────────────────────

    async fn register_peer(&self, peer_id: PeerId, name: &str, transport: WsTransport) {
        let record = Arc::new(PeerRecord::new(peer_id, name, transport.clone()));
        self.inner.registry.add(record).await;
        self.inner.router.fire_peer_connected(peer_id).await;
        info!(%peer_id, name, "peer connected");

        let core = self.clone();
        tokio::spawn(async move {
            core.run_reader(peer_id, transport).await;
        });
    }

    async fn run_reader(&self, peer_id: PeerId, transport: WsTransport) {
        let mut events = transport.subscribe();
        loop {
            match events.recv().await {
                Ok(TransportEvent::Message(text)) => {
                    if let Some(peer) = self.inner.registry.get(peer_id).await {
                        peer.touch();
                    }
                    match Envelope::deserialize(text.as_bytes()) {
                        Ok(envelope) => {
                            self.inner
                                .router
                                .dispatch(envelope, peer_id, &self.inner.registry)
                                .await;
                        }
                        Err(e) => {
                            warn!(%peer_id, error = %e, "discarding invalid inbound frame");
                        }
                    }
                }
                Ok(TransportEvent::Disconnected) => {
                    self.handle_peer_gone(peer_id).await;
                    return;
                }
                Ok(TransportEvent::Error(e)) => {
                    warn!(%peer_id, error = %e, "transport error");
                }
                Ok(TransportEvent::Reconnecting { attempt, max_attempts }) => {
                    info!(%peer_id, attempt, max_attempts, "peer reconnecting");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%peer_id, skipped = n, "reader lagged behind transport events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    self.handle_peer_gone(peer_id).await;
                    return;
                }
            }
        }
    }

    async fn handle_peer_gone(&self, peer_id: PeerId) {
        if self.inner.registry.remove(peer_id).await.is_some() {
            self.inner.correlator.fail_by_peer(peer_id);
            self.inner.router.fire_peer_disconnected(peer_id).await;
            info!(%peer_id, "peer disconnected");
        }
    }

    // ── Public RPC surface ───────────────────────────────────────────────────

    pub async fn get_peers(&self) -> Vec<PeerInfo> {
        self.inner.registry.info_all().await
    }

    pub async fn get_peer_count(&self) -> usize {
        self.inner.registry.len().await
    }

    pub async fn send_to_peer(&self, peer_id: PeerId, envelope: Envelope) -> Result<(), BridgeError> {
        let peer = self
            .inner
            .registry
            .get(peer_id)
            .await
            .ok_or(BridgeError::PeerNotFound(peer_id))?;
        let bytes = envelope.serialize()?;
        peer.transport
            .send(String::from_utf8_lossy(&bytes).into_owned())
            .await
            .map_err(|e| BridgeError::SendError(e.to_string()))
    }

    /// Broadcasts `envelope` to every connected peer. Failures are
    /// per-peer isolated: logged, not propagated.
    pub async fn broadcast(&self, envelope: Envelope) {
        let Ok(bytes) = envelope.serialize() else {
            warn!("failed to serialize broadcast envelope");
            return;
        };
        let frame = String::from_utf8_lossy(&bytes).into_owned();
        for peer in self.inner.registry.iter_all().await {
            if let Err(e) = peer.transport.send(frame.clone()).await {
                warn!(peer_id = %peer.id, error = %e, "broadcast to peer failed");
            }
        }
    }

    /// Delegates `task` to `peer_id` (default: first connected peer).
    /// Fails with `NoPeersConnected` if none are connected.
    pub async fn delegate_task(
        &self,
        task: TaskRequest,
        peer_id: Option<PeerId>,
    ) -> Result<TaskResult, BridgeError> {
        self.ensure_started()?;
        let target = self.resolve_target(peer_id).await?;
        let timeout_ms = task
            .timeout
            .or_else(|| self.inner.config.task_timeout.map(|d| d.as_millis() as u64))
            .unwrap_or(300_000);

        let task_id = task.id.clone();
        let envelope = Envelope::task_delegate(&self.inner.instance_name, task);
        let pending = self.inner.correlator.register_task(
            task_id.clone(),
            target,
            Duration::from_millis(timeout_ms),
        );

        if let Err(e) = self.send_to_peer(target, envelope).await {
            self.inner
                .correlator
                .complete_task(&task_id, Err(CorrelatorError::HandlerError(e.to_string())));
            return Err(e);
        }

        pending.await.map_err(correlator_err_to_bridge)
    }

    /// Requests ranked context excerpts from `peer_id` (default: first
    /// connected peer).
    pub async fn request_context(
        &self,
        query: impl Into<String>,
        peer_id: Option<PeerId>,
        timeout_ms: u64,
    ) -> Result<Vec<bridge_protocol::FileChunk>, BridgeError> {
        self.ensure_started()?;
        let target = self.resolve_target(peer_id).await?;

        let envelope = Envelope::request_context(&self.inner.instance_name, Context::with_summary(query));
        let request_id = envelope.id.to_string();
        let pending =
            self.inner
                .correlator
                .register_context(request_id.clone(), target, Duration::from_millis(timeout_ms));

        if let Err(e) = self.send_to_peer(target, envelope).await {
            self.inner.correlator.complete_context(
                &request_id,
                Err(CorrelatorError::HandlerError(e.to_string())),
            );
            return Err(e);
        }

        pending
            .await
            .map(|context| context.files)
            .map_err(correlator_err_to_bridge)
    }

    async fn resolve_target(&self, peer_id: Option<PeerId>) -> Result<PeerId, BridgeError> {
        match peer_id {
            Some(id) => {
                if self.inner.registry.get(id).await.is_some() {
                    Ok(id)
                } else {
                    Err(BridgeError::PeerNotFound(id))
                }
            }
            None => self
                .inner
                .registry
                .first()
                .await
                .map(|p| p.id)
                .ok_or(BridgeError::NoPeersConnected),
        }
    }

    /// Implements `syncContext`: unicasts to `peer_id` if set, else
    /// broadcasts to every connected peer.
    pub async fn sync_context(&self, context: Option<Context>, peer_id: Option<PeerId>) {
        let envelope = Envelope::context_sync(&self.inner.instance_name, context.unwrap_or_default());
        match peer_id {
            Some(id) => {
                if let Err(e) = self.send_to_peer(id, envelope).await {
                    warn!(peer_id = %id, error = %e, "context sync to peer failed");
                }
            }
            None => self.broadcast(envelope).await,
        }
    }

    // ── Auto-sync ────────────────────────────────────────────────────────────

    /// Starts the periodic sync schedule at `config.context_sharing.
    /// sync_interval_ms`. `provider` is called on every tick; its result
    /// (if any) is broadcast via `sync_context`.
    pub async fn start_auto_sync(&self, provider: Option<ContextProviderFn>) {
        self.stop_auto_sync().await;
        let interval = Duration::from_millis(self.inner.config.context_sharing.sync_interval_ms);

        let core = self.clone();
        let sync_fn: Arc<dyn Fn(Option<Context>) -> BoxFuture<()> + Send + Sync> =
            Arc::new(move |context| {
                let core = core.clone();
                Box::pin(async move {
                    core.sync_context(context, None).await;
                })
            });

        let handle = AutoSyncHandle::spawn(interval, provider, sync_fn);
        *self.inner.autosync.lock().await = Some(handle);
    }

    /// Idempotent.
    pub async fn stop_auto_sync(&self) {
        if let Some(handle) = self.inner.autosync.lock().await.take() {
            handle.stop().await;
        }
    }

    // ── Handler registration ─────────────────────────────────────────────────

    pub async fn on_task_received(&self, handler: TaskHandlerFn) {
        self.inner.router.set_task_handler(handler).await;
    }

    pub async fn on_context_requested(&self, handler: ContextHandlerFn) {
        self.inner.router.set_context_handler(handler).await;
    }

    pub async fn on_peer_connected(&self, handler: PeerEventHandlerFn) {
        self.inner.router.on_peer_connected(handler).await;
    }

    pub async fn on_peer_disconnected(&self, handler: PeerEventHandlerFn) {
        self.inner.router.on_peer_disconnected(handler).await;
    }

    pub async fn on_context_received(&self, handler: ContextReceivedHandlerFn) {
        self.inner.router.on_context_received(handler).await;
    }

    pub async fn on_message(&self, handler: MessageHandlerFn) {
        self.inner.router.on_message(handler).await;
    }

    // ── Status ───────────────────────────────────────────────────────────────

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            port: self.inner.config.listen.as_ref().map(|l| l.port),
            instance_name: self.inner.instance_name.clone(),
            mode: self.inner.mode,
            peers: self.inner.registry.info_all().await,
        }
    }
}

fn correlator_err_to_bridge(e: CorrelatorError) -> BridgeError {
    match e {
        CorrelatorError::Timeout(ms) => BridgeError::Timeout(ms),
        CorrelatorError::PeerDisconnected => BridgeError::PeerDisconnected,
        CorrelatorError::BridgeShuttingDown => BridgeError::BridgeShuttingDown,
        CorrelatorError::HandlerError(msg) => BridgeError::HandlerError(msg),
    }
}

async fn accept_handler(
    State(core): State<BridgeCore>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        core.accept_connection(socket, Some(addr.ip())).await;
    })
}
