// SPDX-License-Identifier: Apache-2.0
//! Dispatches inbound envelopes to registered handlers, and forwards
//! un-handleable requests one hop to another connected peer.
//!
//! Task and context-request handlers are single-slot (most-recent wins);
//! peer-connected/disconnected, context-received and generic message
//! handlers are multi-slot. A handler's own failure never takes the router
//! down with it — `Err` from a task/context handler becomes a failure
//! response; a panicking multi-slot handler is isolated with
//! `catch_unwind` so one bad handler can't take the others down with it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::{Context, Envelope, MessageType, TaskResult};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::correlator::{Correlator, CorrelatorError};
use crate::registry::{PeerId, PeerRegistry};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type TaskHandlerFn =
    Arc<dyn Fn(bridge_protocol::TaskRequest) -> BoxFuture<Result<TaskResult, String>> + Send + Sync>;
pub type ContextHandlerFn =
    Arc<dyn Fn(String) -> BoxFuture<Result<Vec<bridge_protocol::FileChunk>, String>> + Send + Sync>;
pub type PeerEventHandlerFn = Arc<dyn Fn(PeerId) + Send + Sync>;
pub type ContextReceivedHandlerFn = Arc<dyn Fn(Context, PeerId) + Send + Sync>;
pub type MessageHandlerFn = Arc<dyn Fn(Envelope, PeerId) + Send + Sync>;

/// Deadline given to a locally-registered task/context handler before the
/// router gives up waiting and reports a handler failure. This is distinct
/// from the requester's own `delegate_task`/`request_context` timeout,
/// which the requester enforces on its own side of the wire.
const LOCAL_HANDLER_BUDGET: Duration = Duration::from_secs(300);

#[derive(Default)]
struct Handlers {
    task: Mutex<Option<TaskHandlerFn>>,
    context: Mutex<Option<ContextHandlerFn>>,
    peer_connected: Mutex<Vec<PeerEventHandlerFn>>,
    peer_disconnected: Mutex<Vec<PeerEventHandlerFn>>,
    context_received: Mutex<Vec<ContextReceivedHandlerFn>>,
    message_received: Mutex<Vec<MessageHandlerFn>>,
}

/// Routes inbound messages for one `BridgeCore` instance. Cheap to clone;
/// shares handler registrations and the correlator/registry it was built
/// with.
#[derive(Clone)]
pub struct Router {
    handlers: Arc<Handlers>,
    correlator: Arc<Correlator>,
    instance_name: Arc<str>,
}

impl Router {
    pub fn new(correlator: Arc<Correlator>, instance_name: impl Into<Arc<str>>) -> Self {
        Self {
            handlers: Arc::new(Handlers::default()),
            correlator,
            instance_name: instance_name.into(),
        }
    }

    pub async fn set_task_handler(&self, handler: TaskHandlerFn) {
        *self.handlers.task.lock().await = Some(handler);
    }

    pub async fn set_context_handler(&self, handler: ContextHandlerFn) {
        *self.handlers.context.lock().await = Some(handler);
    }

    pub async fn on_peer_connected(&self, handler: PeerEventHandlerFn) {
        self.handlers.peer_connected.lock().await.push(handler);
    }

    pub async fn on_peer_disconnected(&self, handler: PeerEventHandlerFn) {
        self.handlers.peer_disconnected.lock().await.push(handler);
    }

    pub async fn on_context_received(&self, handler: ContextReceivedHandlerFn) {
        self.handlers.context_received.lock().await.push(handler);
    }

    pub async fn on_message(&self, handler: MessageHandlerFn) {
        self.handlers.message_received.lock().await.push(handler);
    }

    pub async fn fire_peer_connected(&self, peer_id: PeerId) {
        for handler in self.handlers.peer_connected.lock().await.iter() {
            run_isolated(|| handler(peer_id));
        }
    }

    pub async fn fire_peer_disconnected(&self, peer_id: PeerId) {
        for handler in self.handlers.peer_disconnected.lock().await.iter() {
            run_isolated(|| handler(peer_id));
        }
    }

    /// Dispatches one inbound envelope from `from_peer`. `registry` is used
    /// to send responses and forwarded frames; `from_peer`'s `lastActivity`
    /// must already have been touched by the caller before this runs.
    pub async fn dispatch(&self, envelope: Envelope, from_peer: PeerId, registry: &PeerRegistry) {
        match envelope.message_type {
            MessageType::TaskDelegate => self.handle_task_delegate(envelope, from_peer, registry).await,
            MessageType::Response => {
                if let Some(result) = &envelope.result {
                    if result.task_id.is_some() {
                        self.handle_task_response(envelope.clone(), registry).await;
                        return;
                    }
                }
                if envelope.context.is_some() {
                    self.handle_context_response(envelope, registry).await;
                }
            }
            MessageType::Request => {
                let is_context_query = envelope
                    .context
                    .as_ref()
                    .and_then(|c| c.summary.as_ref())
                    .is_some_and(|s| !s.is_empty());
                if is_context_query {
                    self.handle_context_request(envelope, from_peer, registry).await;
                }
            }
            MessageType::ContextSync => {
                if let Some(context) = envelope.context {
                    for handler in self.handlers.context_received.lock().await.iter() {
                        run_isolated(|| handler(context.clone(), from_peer));
                    }
                }
            }
            MessageType::Notification => {
                for handler in self.handlers.message_received.lock().await.iter() {
                    run_isolated(|| handler(envelope.clone(), from_peer));
                }
            }
        }
    }

    async fn handle_task_delegate(&self, envelope: Envelope, from_peer: PeerId, registry: &PeerRegistry) {
        let Some(task) = envelope.task.clone() else {
            return;
        };
        let handler = self.handlers.task.lock().await.clone();
        if let Some(handler) = handler {
            let task_id = task.id.clone();
            let outcome = tokio::time::timeout(LOCAL_HANDLER_BUDGET, handler(task))
                .await
                .unwrap_or_else(|_| Err("local task handler timed out".to_string()));
            let result = match outcome {
                Ok(mut result) => {
                    result.task_id = Some(task_id);
                    result
                }
                Err(message) => TaskResult::failed(task_id, message),
            };
            let response = Envelope::response_result(self.instance_name.as_ref(), result);
            self.send_to(registry, from_peer, response).await;
            return;
        }

        match registry.first_other_than(from_peer).await {
            Some(target) => {
                self.correlator
                    .register_forward_task(task.id.clone(), from_peer);
                self.send_to(registry, target.id, envelope).await;
            }
            None => {
                let result = TaskResult::failed(task.id, "No task handler registered on peer");
                let response = Envelope::response_result(self.instance_name.as_ref(), result);
                self.send_to(registry, from_peer, response).await;
            }
        }
    }

    async fn handle_task_response(&self, envelope: Envelope, registry: &PeerRegistry) {
        let Some(result) = envelope.result.clone() else {
            return;
        };
        let Some(task_id) = result.task_id.clone() else {
            return;
        };

        if let Some(originator) = self.correlator.take_forward_task(&task_id) {
            self.send_to(registry, originator, envelope).await;
            return;
        }

        let outcome = if result.success {
            Ok(result)
        } else {
            Err(CorrelatorError::HandlerError(
                result.error.clone().unwrap_or_default(),
            ))
        };
        self.correlator.complete_task(&task_id, outcome);
    }

    async fn handle_context_request(&self, envelope: Envelope, from_peer: PeerId, registry: &PeerRegistry) {
        let query = envelope
            .context
            .as_ref()
            .and_then(|c| c.summary.clone())
            .unwrap_or_default();
        let handler = self.handlers.context.lock().await.clone();

        if let Some(handler) = handler {
            let outcome = tokio::time::timeout(LOCAL_HANDLER_BUDGET, handler(query))
                .await
                .unwrap_or_else(|_| Err("local context handler timed out".to_string()));

            let mut response_context = Context::default();
            response_context.set_variable(
                "requestId",
                serde_json::Value::String(envelope.id.to_string()),
            );
            match outcome {
                Ok(files) => response_context.files = files,
                Err(message) => {
                    response_context.set_variable("error", serde_json::Value::String(message));
                }
            }

            let response = Envelope::response_context(self.instance_name.as_ref(), response_context);
            self.send_to(registry, from_peer, response).await;
            return;
        }

        match registry.first_other_than(from_peer).await {
            Some(target) => {
                self.correlator
                    .register_forward_context(envelope.id.to_string(), from_peer);
                self.send_to(registry, target.id, envelope).await;
            }
            None => {
                let mut response_context = Context::default();
                response_context.set_variable(
                    "requestId",
                    serde_json::Value::String(envelope.id.to_string()),
                );
                response_context.set_variable(
                    "error",
                    serde_json::Value::String("No context handler registered on peer".into()),
                );
                let response = Envelope::response_context(self.instance_name.as_ref(), response_context);
                self.send_to(registry, from_peer, response).await;
            }
        }
    }

    async fn handle_context_response(&self, envelope: Envelope, registry: &PeerRegistry) {
        let Some(context) = envelope.context.clone() else {
            return;
        };
        let Some(request_id) = context
            .variable("requestId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            warn!("context response carried no requestId; dropping");
            return;
        };

        if let Some(originator) = self.correlator.take_forward_context(&request_id) {
            self.send_to(registry, originator, envelope).await;
            return;
        }

        let outcome = match context.variable("error").and_then(|v| v.as_str()) {
            Some(message) => Err(CorrelatorError::HandlerError(message.to_string())),
            None => Ok(context),
        };
        self.correlator.complete_context(&request_id, outcome);
    }

    async fn send_to(&self, registry: &PeerRegistry, peer_id: PeerId, envelope: Envelope) {
        let Some(peer) = registry.get(peer_id).await else {
            warn!(%peer_id, "cannot route message: peer no longer connected");
            return;
        };
        let Ok(bytes) = envelope.serialize() else {
            error!("failed to serialize outbound envelope");
            return;
        };
        if let Err(e) = peer
            .transport
            .send(String::from_utf8_lossy(&bytes).into_owned())
            .await
        {
            warn!(%peer_id, error = %e, "failed to deliver routed message");
        }
    }
}

/// Runs a synchronous handler, catching panics so one misbehaving
/// subscriber cannot take down dispatch for the rest: handlers run outside
/// all internal locks and their panics are caught at the call site.
fn run_isolated(f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("message handler panicked; isolated by the router");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{TaskRequest, TaskScope};
    use bridge_transport::{ConnEvent, PeerConn, TransportConfig, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct RecordingConn {
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PeerConn for RecordingConn {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            let _ = self.sent.send(frame);
            Ok(())
        }
        async fn ping(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>> {
            std::future::pending::<Option<Result<ConnEvent, TransportError>>>().await
        }
        async fn close(&mut self, _code: u16, _reason: String) {}
    }

    async fn registry_with_peer() -> (PeerRegistry, PeerId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = bridge_transport::WsTransport::from_accepted(
            TransportConfig::new("ws://unused"),
            Box::new(RecordingConn { sent: tx }),
        );
        let registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        registry
            .add(Arc::new(crate::registry::PeerRecord::new(id, "peer", transport)))
            .await;
        (registry, id, rx)
    }

    #[tokio::test]
    async fn task_delegate_with_handler_responds_with_echoed_task_id() {
        let correlator = Arc::new(Correlator::new());
        let router = Router::new(correlator, "host");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        router
            .set_task_handler(Arc::new(move |task| {
                calls2.fetch_add(1, Ordering::SeqCst);
                let id = task.id.clone();
                Box::pin(async move { Ok(TaskResult::ok(id, serde_json::json!({"ok": true}))) })
            }))
            .await;

        let (registry, peer_id, mut rx) = registry_with_peer().await;
        let envelope = Envelope::task_delegate(
            "client",
            TaskRequest::new("t-1", "do it", TaskScope::Execute),
        );

        router.dispatch(envelope, peer_id, &registry).await;

        let frame = rx.recv().await.unwrap();
        let response = Envelope::deserialize(frame.as_bytes()).unwrap();
        assert_eq!(response.result.unwrap().task_id.as_deref(), Some("t-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn task_delegate_without_handler_or_peer_returns_error_response() {
        let correlator = Arc::new(Correlator::new());
        let router = Router::new(correlator, "host");
        let (registry, peer_id, mut rx) = registry_with_peer().await;

        let envelope = Envelope::task_delegate(
            "client",
            TaskRequest::new("t-2", "do it", TaskScope::Execute),
        );
        router.dispatch(envelope, peer_id, &registry).await;

        let frame = rx.recv().await.unwrap();
        let response = Envelope::deserialize(frame.as_bytes()).unwrap();
        let result = response.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No task handler registered on peer"));
    }

    #[tokio::test]
    async fn task_response_completes_correlator_entry() {
        let correlator = Arc::new(Correlator::new());
        let router = Router::new(correlator.clone(), "client");
        let (registry, peer_id, _rx) = registry_with_peer().await;

        let fut = correlator.register_task("t-3".into(), peer_id, Duration::from_secs(5));
        let response = Envelope::response_result(
            "host",
            TaskResult::ok("t-3", serde_json::json!({"echoId": "t-3"})),
        );
        router.dispatch(response, peer_id, &registry).await;

        let result = fut.await.unwrap();
        assert_eq!(result.data["echoId"], "t-3");
    }
}
