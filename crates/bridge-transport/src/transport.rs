// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior, Sleep};
use tracing::warn;

use crate::client::ClientWsConn;
use crate::conn::{ConnEvent, PeerConn};
use crate::error::TransportError;
use crate::state::{TransportConfig, TransportEvent, TransportState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct QueuedFrame {
    frame: String,
    reply: Option<oneshot::Sender<Result<(), TransportError>>>,
}

enum Command {
    Send(String, oneshot::Sender<Result<(), TransportError>>),
    Disconnect(u16, String),
}

type DialFuture = Pin<Box<dyn Future<Output = Result<Box<dyn PeerConn>, TransportError>> + Send>>;
type Dialer = Box<dyn Fn() -> DialFuture + Send + Sync>;

/// Owns exactly one bidirectional connection, a bounded send queue, and the
/// reconnect/heartbeat state machine described in the crate's module docs.
///
/// Cloning a handle is cheap — clones share the same background task.
#[derive(Clone)]
pub struct WsTransport {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<RwLock<TransportState>>,
    send_deadline: std::time::Duration,
}

impl WsTransport {
    /// Dials `config.url` immediately, failing fast if the *initial* attempt
    /// does not succeed. Reconnects thereafter are driven by
    /// `config.reconnect`.
    pub async fn dial(config: TransportConfig) -> Result<Self, TransportError> {
        let url = config.url.clone();
        let dialer: Dialer = Box::new(move || {
            let url = url.clone();
            Box::pin(async move {
                ClientWsConn::connect(&url)
                    .await
                    .map(|c| Box::new(c) as Box<dyn PeerConn>)
            })
        });
        let conn = dialer().await?;
        Ok(Self::spawn(config, Some(dialer), conn))
    }

    /// Wraps an already-accepted connection (server side). No dialer is
    /// available, so on close this transport goes straight to
    /// `Disconnected` regardless of `config.reconnect` — the listener is
    /// responsible for accepting a new connection if the peer redials.
    pub fn from_accepted(config: TransportConfig, conn: Box<dyn PeerConn>) -> Self {
        Self::spawn(config, None, conn)
    }

    fn spawn(config: TransportConfig, dialer: Option<Dialer>, conn: Box<dyn PeerConn>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(RwLock::new(TransportState::Connecting));
        let send_deadline = config.send_deadline;
        let handle = Self {
            cmd_tx,
            events: events.clone(),
            state: state.clone(),
            send_deadline,
        };
        tokio::spawn(run(config, dialer, conn, cmd_rx, events, state));
        handle
    }

    pub async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Sends one frame. While reconnecting, the frame is queued rather than
    /// rejected; once the background task has exited (reconnects
    /// exhausted, or intentional disconnect already acknowledged) this
    /// returns `NotConnected`. A caller that would block longer than the
    /// configured send deadline waiting for the writer task to accept the
    /// command fails with `SendBackpressure` instead of waiting forever.
    pub async fn send(&self, frame: String) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        match tokio::time::timeout(self.send_deadline, self.cmd_tx.send(Command::Send(frame, tx))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(TransportError::NotConnected),
            Err(_) => {
                return Err(TransportError::SendBackpressure(
                    self.send_deadline.as_millis() as u64,
                ))
            }
        }
        rx.await.map_err(|_| TransportError::NotConnected)?
    }

    /// Intentional close: clears the queue, suppresses reconnect, transport
    /// ends in `Disconnected`. Closes with code `1000`, reason
    /// `"Disconnect requested"`.
    pub async fn disconnect(&self) {
        self.disconnect_with(1000, "Disconnect requested").await;
    }

    /// Same as [`Self::disconnect`] but with a caller-chosen close code and
    /// reason, e.g. `BridgeCore::stop()`'s `1000` / `"Bridge stopping"`.
    pub async fn disconnect_with(&self, code: u16, reason: impl Into<String>) {
        let _ = self
            .cmd_tx
            .send(Command::Disconnect(code, reason.into()))
            .await;
    }
}

enum ConnectedExit {
    Intentional,
    Dropped,
}

async fn run(
    config: TransportConfig,
    dialer: Option<Dialer>,
    initial_conn: Box<dyn PeerConn>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<RwLock<TransportState>>,
) {
    let mut queue: VecDeque<QueuedFrame> = VecDeque::new();
    let mut conn = Some(initial_conn);
    let mut attempt: u32 = 0;

    loop {
        let active = match conn.take() {
            Some(c) => c,
            None => {
                match acquire(&dialer, &config, &mut attempt, &mut cmd_rx, &mut queue, &events, &state).await {
                    Some(c) => c,
                    None => return,
                }
            }
        };

        match run_connected(active, &config, &mut queue, &mut cmd_rx, &events, &state).await {
            ConnectedExit::Intentional => {
                *state.write().await = TransportState::Disconnected;
                queue.clear();
                return;
            }
            ConnectedExit::Dropped => {
                *state.write().await = TransportState::Reconnecting;
                let _ = events.send(TransportEvent::Disconnected);
                conn = None;
            }
        }
    }
}

/// Obtains the next connection, blocking across the reconnect backoff while
/// still honoring commands sent in the meantime: a queued `Send` is kept for
/// the next successful reconnect's flush, and a `Disconnect` ends the
/// backoff immediately rather than waiting for the in-flight sleep/dial to
/// resolve first. On exhaustion or when no dialer is available
/// (server-accepted transport), returns `None` and the caller's task ends.
async fn acquire(
    dialer: &Option<Dialer>,
    config: &TransportConfig,
    attempt: &mut u32,
    cmd_rx: &mut mpsc::Receiver<Command>,
    queue: &mut VecDeque<QueuedFrame>,
    events: &broadcast::Sender<TransportEvent>,
    state: &Arc<RwLock<TransportState>>,
) -> Option<Box<dyn PeerConn>> {
    let dial = match dialer.as_ref() {
        Some(d) => d,
        None => {
            *state.write().await = TransportState::Disconnected;
            return None;
        }
    };
    if !config.reconnect {
        *state.write().await = TransportState::Disconnected;
        return None;
    }

    loop {
        if *attempt >= config.max_reconnect_attempts {
            *state.write().await = TransportState::Disconnected;
            let _ = events.send(TransportEvent::Error(
                TransportError::MaxReconnectsExhausted(*attempt).to_string(),
            ));
            return None;
        }
        *attempt += 1;
        let _ = events.send(TransportEvent::Reconnecting {
            attempt: *attempt,
            max_attempts: config.max_reconnect_attempts,
        });

        let wait_until = Instant::now() + config.reconnect_interval;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send(frame, reply)) => {
                            queue.push_back(QueuedFrame { frame, reply: Some(reply) });
                        }
                        Some(Command::Disconnect(_, _)) | None => {
                            *state.write().await = TransportState::Disconnected;
                            return None;
                        }
                    }
                }
                _ = sleep_until(wait_until) => break,
            }
        }

        *state.write().await = TransportState::Connecting;
        let dial_fut = dial();
        tokio::pin!(dial_fut);
        let dial_result = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send(frame, reply)) => {
                            queue.push_back(QueuedFrame { frame, reply: Some(reply) });
                        }
                        Some(Command::Disconnect(_, _)) | None => {
                            *state.write().await = TransportState::Disconnected;
                            return None;
                        }
                    }
                }
                res = &mut dial_fut => break res,
            }
        };

        match dial_result {
            Ok(c) => {
                *attempt = 0;
                return Some(c);
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
            }
        }
    }
}

/// Drains the queue in FIFO order. On the first send failure the failing
/// frame is put back at the front and the flush aborts — it is retried on
/// the next successful reconnect.
async fn flush_queue(conn: &mut dyn PeerConn, queue: &mut VecDeque<QueuedFrame>) -> bool {
    while let Some(queued) = queue.pop_front() {
        match conn.send(queued.frame.clone()).await {
            Ok(()) => {
                if let Some(reply) = queued.reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                let failed_reply = queued.reply;
                queue.push_front(QueuedFrame {
                    frame: queued.frame,
                    reply: failed_reply,
                });
                return false;
            }
        }
    }
    true
}

async fn run_connected(
    mut conn: Box<dyn PeerConn>,
    config: &TransportConfig,
    queue: &mut VecDeque<QueuedFrame>,
    cmd_rx: &mut mpsc::Receiver<Command>,
    events: &broadcast::Sender<TransportEvent>,
    state: &Arc<RwLock<TransportState>>,
) -> ConnectedExit {
    *state.write().await = TransportState::Connected;

    if !flush_queue(conn.as_mut(), queue).await {
        return ConnectedExit::Dropped;
    }

    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pong_deadline: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(frame, reply)) => {
                        let result = conn.send(frame).await;
                        let failed = result.is_err();
                        let _ = reply.send(result);
                        if failed {
                            return ConnectedExit::Dropped;
                        }
                    }
                    Some(Command::Disconnect(code, reason)) => {
                        conn.close(code, reason).await;
                        return ConnectedExit::Intentional;
                    }
                    None => {
                        conn.close(1000, "Disconnect requested".into()).await;
                        return ConnectedExit::Intentional;
                    }
                }
            }
            event = conn.recv() => {
                match event {
                    Some(Ok(ConnEvent::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Some(Ok(ConnEvent::Pong)) => {
                        pong_deadline = None;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return ConnectedExit::Dropped;
                    }
                    None => return ConnectedExit::Dropped,
                }
            }
            _ = heartbeat.tick() => {
                if pong_deadline.is_some() {
                    warn!("previous heartbeat still unanswered, forcing reconnect");
                    conn.close(1000, "heartbeat timeout".into()).await;
                    let _ = events.send(TransportEvent::Error(TransportError::HeartbeatTimeout.to_string()));
                    return ConnectedExit::Dropped;
                }
                if conn.ping().await.is_err() {
                    return ConnectedExit::Dropped;
                }
                pong_deadline = Some(Box::pin(sleep_until(Instant::now() + config.heartbeat_timeout)));
            }
            _ = maybe_deadline(&mut pong_deadline), if pong_deadline.is_some() => {
                warn!("heartbeat timeout elapsed, forcing reconnect");
                conn.close(1000, "heartbeat timeout".into()).await;
                let _ = events.send(TransportEvent::Error(TransportError::HeartbeatTimeout.to_string()));
                return ConnectedExit::Dropped;
            }
        }
    }
}

async fn maybe_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    if let Some(sleep) = deadline.as_mut() {
        sleep.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc as tmpsc;

    /// An in-process `PeerConn` backed by channels, standing in for a real
    /// socket in tests.
    struct MockConn {
        outbox: tmpsc::UnboundedSender<String>,
        inbox: tmpsc::UnboundedReceiver<ConnEvent>,
        closed: bool,
    }

    fn mock_pair() -> (MockConn, tmpsc::UnboundedReceiver<String>, tmpsc::UnboundedSender<ConnEvent>) {
        let (out_tx, out_rx) = tmpsc::unbounded_channel();
        let (in_tx, in_rx) = tmpsc::unbounded_channel();
        (
            MockConn {
                outbox: out_tx,
                inbox: in_rx,
                closed: false,
            },
            out_rx,
            in_tx,
        )
    }

    #[async_trait]
    impl PeerConn for MockConn {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            self.outbox
                .send(frame)
                .map_err(|_| TransportError::Send("peer gone".into()))
        }

        async fn ping(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>> {
            if self.closed {
                return None;
            }
            self.inbox.recv().await.map(Ok)
        }

        async fn close(&mut self, _code: u16, _reason: String) {
            self.closed = true;
        }
    }

    #[tokio::test]
    async fn from_accepted_starts_connected_and_delivers_messages() {
        let (conn, _out_rx, in_tx) = mock_pair();
        let config = TransportConfig {
            reconnect: false,
            ..TransportConfig::new("ws://unused")
        };
        let transport = WsTransport::from_accepted(config, Box::new(conn));
        let mut events = transport.subscribe();

        in_tx.send(ConnEvent::Text("hello".into())).unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(ev, TransportEvent::Message(m) if m == "hello"));
    }

    #[tokio::test]
    async fn send_round_trips_through_mock_conn() {
        let (conn, mut out_rx, _in_tx) = mock_pair();
        let config = TransportConfig {
            reconnect: false,
            ..TransportConfig::new("ws://unused")
        };
        let transport = WsTransport::from_accepted(config, Box::new(conn));

        transport.send("ping-frame".into()).await.unwrap();
        let forwarded = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded, "ping-frame");
    }

    #[tokio::test]
    async fn disconnect_ends_the_transport_without_reconnect() {
        let (conn, _out_rx, _in_tx) = mock_pair();
        let config = TransportConfig {
            reconnect: false,
            ..TransportConfig::new("ws://unused")
        };
        let transport = WsTransport::from_accepted(config, Box::new(conn));

        transport.disconnect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.state().await, TransportState::Disconnected);
        assert!(transport.send("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn no_dialer_drops_straight_to_disconnected_on_close() {
        let (conn, _out_rx, in_tx) = mock_pair();
        let config = TransportConfig {
            reconnect: true,
            ..TransportConfig::new("ws://unused")
        };
        let transport = WsTransport::from_accepted(config, Box::new(conn));
        drop(in_tx); // peer closes

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_during_reconnect_backoff_is_honored_immediately() {
        let (conn, _out_rx, in_tx) = mock_pair();
        let dialer: Dialer = Box::new(|| Box::pin(async { Err(TransportError::NotConnected) }));
        let config = TransportConfig {
            reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 50,
            ..TransportConfig::new("ws://unused")
        };
        let transport = WsTransport::spawn(config, Some(dialer), Box::new(conn));

        drop(in_tx); // peer closes, transport enters Reconnecting and starts backing off
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.state().await, TransportState::Reconnecting);

        transport.disconnect().await;
        tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if transport.state().await == TransportState::Disconnected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("disconnect should cut the backoff short instead of waiting out reconnect_interval");
    }
}
