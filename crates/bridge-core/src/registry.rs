// SPDX-License-Identifier: Apache-2.0
//! The set of connected peers. An insertion-ordered map from
//! peer id to peer record, guarded by one `RwLock` — a single lock held
//! only for short critical sections, never across a user-handler await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bridge_transport::WsTransport;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type PeerId = Uuid;

/// One connected peer: its transport handle and peer-record metadata.
/// `last_activity` uses an atomic rather than living
/// behind the registry lock so the router can touch it on every inbound
/// frame without taking a write lock on the whole map.
pub struct PeerRecord {
    pub id: PeerId,
    name: RwLock<String>,
    pub connected_at: i64,
    last_activity: AtomicI64,
    pub transport: WsTransport,
}

impl PeerRecord {
    pub fn new(id: PeerId, name: impl Into<String>, transport: WsTransport) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id,
            name: RwLock::new(name.into()),
            connected_at: now,
            last_activity: AtomicI64::new(now),
            transport,
        }
    }

    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    /// Peer-reported name is best-effort informational only — no update
    /// message exists in the wire protocol to revise it after connect, so
    /// this is exposed for forward-compatibility but nothing in this crate
    /// calls it today.
    pub async fn set_name(&self, name: impl Into<String>) {
        *self.name.write().await = name.into();
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// A snapshot-friendly view of one peer, safe to hand to callers of
/// `getPeers() -> [PeerInfo]` and the status document's `peers` field.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub connected_at: i64,
    pub last_activity: i64,
}

#[derive(Default)]
struct Inner {
    order: Vec<PeerId>,
    peers: HashMap<PeerId, Arc<PeerRecord>>,
}

/// Insertion-ordered, key-unique registry of connected peers.
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<Inner>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, record: Arc<PeerRecord>) {
        let mut inner = self.inner.write().await;
        if !inner.peers.contains_key(&record.id) {
            inner.order.push(record.id);
        }
        inner.peers.insert(record.id, record);
    }

    pub async fn remove(&self, id: PeerId) -> Option<Arc<PeerRecord>> {
        let mut inner = self.inner.write().await;
        let removed = inner.peers.remove(&id);
        if removed.is_some() {
            inner.order.retain(|p| *p != id);
        }
        removed
    }

    pub async fn get(&self, id: PeerId) -> Option<Arc<PeerRecord>> {
        self.inner.read().await.peers.get(&id).cloned()
    }

    /// All peers in insertion order.
    pub async fn iter_all(&self) -> Vec<Arc<PeerRecord>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.peers.get(id).cloned())
            .collect()
    }

    /// First peer by insertion order — the default target for
    /// `delegate_task`/`request_context` when no peer id is given.
    pub async fn first(&self) -> Option<Arc<PeerRecord>> {
        let inner = self.inner.read().await;
        inner
            .order
            .first()
            .and_then(|id| inner.peers.get(id).cloned())
    }

    /// First connected peer other than `exclude`, in insertion order — used
    /// by the router to pick a single-hop forwarding target.
    pub async fn first_other_than(&self, exclude: PeerId) -> Option<Arc<PeerRecord>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .find(|id| **id != exclude)
            .and_then(|id| inner.peers.get(id).cloned())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.order.clear();
        inner.peers.clear();
    }

    pub async fn info_all(&self) -> Vec<PeerInfo> {
        let mut out = Vec::new();
        for record in self.iter_all().await {
            out.push(PeerInfo {
                id: record.id,
                name: record.name().await,
                connected_at: record.connected_at,
                last_activity: record.last_activity(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_transport::{ConnEvent, PeerConn, TransportConfig, TransportError};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NullConn;

    #[async_trait]
    impl PeerConn for NullConn {
        async fn send(&mut self, _frame: String) -> Result<(), TransportError> {
            Ok(())
        }
        async fn ping(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn recv(&mut self) -> Option<Result<ConnEvent, TransportError>> {
            let (_tx, mut rx) = mpsc::channel::<()>(1);
            rx.recv().await;
            None
        }
        async fn close(&mut self, _code: u16, _reason: String) {}
    }

    fn transport() -> WsTransport {
        WsTransport::from_accepted(TransportConfig::new("ws://unused"), Box::new(NullConn))
    }

    #[tokio::test]
    async fn insertion_order_is_preserved() {
        let registry = PeerRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry
            .add(Arc::new(PeerRecord::new(a, "a", transport())))
            .await;
        registry
            .add(Arc::new(PeerRecord::new(b, "b", transport())))
            .await;

        let all = registry.iter_all().await;
        assert_eq!(all[0].id, a);
        assert_eq!(all[1].id, b);
        assert_eq!(registry.first().await.unwrap().id, a);
    }

    #[tokio::test]
    async fn first_other_than_skips_excluded_peer() {
        let registry = PeerRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry
            .add(Arc::new(PeerRecord::new(a, "a", transport())))
            .await;
        registry
            .add(Arc::new(PeerRecord::new(b, "b", transport())))
            .await;

        assert_eq!(registry.first_other_than(a).await.unwrap().id, b);
        assert!(registry.first_other_than(b).await.is_some());
    }

    #[tokio::test]
    async fn remove_drops_peer_from_order_and_map() {
        let registry = PeerRegistry::new();
        let a = Uuid::new_v4();
        registry
            .add(Arc::new(PeerRecord::new(a, "a", transport())))
            .await;
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove(a).await;
        assert!(removed.is_some());
        assert_eq!(registry.len().await, 0);
        assert!(registry.get(a).await.is_none());
    }
}
