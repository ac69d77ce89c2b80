// SPDX-License-Identifier: Apache-2.0
//! Pending-request tables for outbound tasks and context queries, plus the
//! single-hop forwarding maps kept as explicit fields rather than
//! properties bolted onto the core at runtime.
//!
//! Each entry is a one-shot channel. Deadlines are enforced with
//! `tokio::time::timeout` wrapping the `oneshot::Receiver` rather than a
//! per-entry timer task, so the timeout path and the `complete()` path can
//! never race: whichever happens first removes the entry, and the other
//! becomes a no-op (a response arriving after a timeout already fired is
//! logged and dropped).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bridge_protocol::{Context, TaskResult};
use tokio::sync::oneshot;
use tracing::debug;

use crate::registry::PeerId;

/// Terminal outcomes a pending request can resolve with. Exactly one of
/// these reaches the caller per request.
#[derive(Debug, Clone)]
pub enum CorrelatorError {
    Timeout(u64),
    PeerDisconnected,
    BridgeShuttingDown,
    HandlerError(String),
}

impl std::fmt::Display for CorrelatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelatorError::Timeout(ms) => write!(f, "request timed out after {ms}ms"),
            CorrelatorError::PeerDisconnected => write!(f, "peer disconnected"),
            CorrelatorError::BridgeShuttingDown => write!(f, "bridge is shutting down"),
            CorrelatorError::HandlerError(msg) => write!(f, "handler error: {msg}"),
        }
    }
}

type PendingResult<T> = Result<T, CorrelatorError>;

struct PendingEntry<T> {
    peer_id: PeerId,
    tx: oneshot::Sender<PendingResult<T>>,
}

/// One symmetrical pending-request table, generic over the success payload
/// (`TaskResult` or `Context`).
struct PendingTable<T> {
    entries: Mutex<HashMap<String, PendingEntry<T>>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingTable<T> {
    /// Registers `id` and returns a future that resolves on `complete()`,
    /// on the deadline elapsing, or drops its own entry in either case.
    fn register(
        &self,
        id: String,
        peer_id: PeerId,
        deadline: Duration,
    ) -> impl std::future::Future<Output = PendingResult<T>> + '_ {
        let (tx, rx) = oneshot::channel();
        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(id.clone(), PendingEntry { peer_id, tx });
        }
        let deadline_ms = deadline.as_millis() as u64;
        async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(outcome)) => outcome,
                // Sender dropped without sending: treat as disconnect, the
                // only path that drops a sender without completing it.
                Ok(Err(_)) => Err(CorrelatorError::PeerDisconnected),
                Err(_) => {
                    // Deadline elapsed first. Remove our own entry (if
                    // `complete()` hasn't already raced us to it) so a late
                    // response has nothing to match and is dropped.
                    self.entries.lock().unwrap().remove(&id);
                    Err(CorrelatorError::Timeout(deadline_ms))
                }
            }
        }
    }

    /// Completes `id` exactly once. A second call (or a call after the
    /// waiting future already timed out and removed the entry) is a no-op —
    /// safe to call once or many times.
    fn complete(&self, id: &str, outcome: PendingResult<T>) -> bool {
        let entry = self.entries.lock().unwrap().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(outcome);
                true
            }
            None => {
                debug!(id, "completion for unknown or already-resolved request dropped");
                false
            }
        }
    }

    fn fail_by_peer(&self, peer_id: PeerId, make_err: impl Fn() -> CorrelatorError) {
        let ids: Vec<String> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.peer_id == peer_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            self.complete(&id, Err(make_err()));
        }
    }

    fn fail_all(&self, make_err: impl Fn() -> CorrelatorError) {
        let ids: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.complete(&id, Err(make_err()));
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn len_for_peer(&self, peer_id: PeerId) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.peer_id == peer_id)
            .count()
    }
}

/// Records who a forwarded request came from, so the response can be
/// routed back across the one hop it is allowed to take. Never
/// re-forwarded past that hop, which rules out forwarding loops.
struct ForwardEntry {
    originator: PeerId,
}

#[derive(Default)]
struct ForwardTable {
    entries: Mutex<HashMap<String, ForwardEntry>>,
}

impl ForwardTable {
    fn insert(&self, id: String, originator: PeerId) {
        self.entries
            .lock()
            .unwrap()
            .insert(id, ForwardEntry { originator });
    }

    fn take(&self, id: &str) -> Option<PeerId> {
        self.entries.lock().unwrap().remove(id).map(|e| e.originator)
    }

    fn drop_for_peer(&self, peer_id: PeerId) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.originator != peer_id);
    }
}

/// The full correlation state: pending task/context tables plus the
/// forwarding maps, all guarded at the granularity calls for
/// (short critical sections, never held across a user handler await).
#[derive(Default)]
pub struct Correlator {
    tasks: PendingTable<TaskResult>,
    contexts: PendingTable<Context>,
    forward_task: ForwardTable,
    forward_context: ForwardTable,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task(
        &self,
        task_id: String,
        peer_id: PeerId,
        deadline: Duration,
    ) -> impl std::future::Future<Output = PendingResult<TaskResult>> + '_ {
        self.tasks.register(task_id, peer_id, deadline)
    }

    pub fn register_context(
        &self,
        request_id: String,
        peer_id: PeerId,
        deadline: Duration,
    ) -> impl std::future::Future<Output = PendingResult<Context>> + '_ {
        self.contexts.register(request_id, peer_id, deadline)
    }

    pub fn complete_task(&self, task_id: &str, outcome: PendingResult<TaskResult>) -> bool {
        self.tasks.complete(task_id, outcome)
    }

    pub fn complete_context(&self, request_id: &str, outcome: PendingResult<Context>) -> bool {
        self.contexts.complete(request_id, outcome)
    }

    /// Completes every pending entry belonging to `peer_id` with
    /// `PeerDisconnected`, and drops any forward mapping that either
    /// originated from or was issued to that peer.
    pub fn fail_by_peer(&self, peer_id: PeerId) {
        self.tasks
            .fail_by_peer(peer_id, || CorrelatorError::PeerDisconnected);
        self.contexts
            .fail_by_peer(peer_id, || CorrelatorError::PeerDisconnected);
        self.forward_task.drop_for_peer(peer_id);
        self.forward_context.drop_for_peer(peer_id);
    }

    /// Completes every pending entry with `BridgeShuttingDown`, called
    /// from `stop()`.
    pub fn fail_all(&self) {
        self.tasks
            .fail_all(|| CorrelatorError::BridgeShuttingDown);
        self.contexts
            .fail_all(|| CorrelatorError::BridgeShuttingDown);
    }

    pub fn register_forward_task(&self, task_id: String, originator: PeerId) {
        self.forward_task.insert(task_id, originator);
    }

    pub fn take_forward_task(&self, task_id: &str) -> Option<PeerId> {
        self.forward_task.take(task_id)
    }

    pub fn register_forward_context(&self, request_id: String, originator: PeerId) {
        self.forward_context.insert(request_id, originator);
    }

    pub fn take_forward_context(&self, request_id: &str) -> Option<PeerId> {
        self.forward_context.take(request_id)
    }

    /// Sum over peers of pending(task or context) for that peer equals the
    /// count of pending-table entries with that peer_id; exposed for tests.
    pub fn pending_count_for_peer(&self, peer_id: PeerId) -> usize {
        self.tasks.len_for_peer(peer_id) + self.contexts.len_for_peer(peer_id)
    }

    pub fn pending_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending_context_count(&self) -> usize {
        self.contexts.len()
    }
}
