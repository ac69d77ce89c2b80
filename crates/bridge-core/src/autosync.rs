// SPDX-License-Identifier: Apache-2.0
//! Periodic context broadcast driven by a user-supplied provider. A fixed
//! `tokio::time::interval` with `MissedTickBehavior::Skip`; provider and
//! broadcast errors are logged and swallowed rather than stopping the
//! schedule.

use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::Context;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::router::BoxFuture;

pub type ContextProviderFn = Arc<dyn Fn() -> BoxFuture<Result<Option<Context>, String>> + Send + Sync>;
pub type SyncFn = Arc<dyn Fn(Option<Context>) -> BoxFuture<()> + Send + Sync>;

/// A running auto-sync schedule. Dropping this without calling `stop()`
/// leaves the background task running until the process exits; callers
/// that need a clean shutdown should call `stop()` explicitly (`BridgeCore`
/// always does, from both `stop_auto_sync()` and `stop()`).
pub struct AutoSyncHandle {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    pub fn spawn(interval: Duration, provider: Option<ContextProviderFn>, sync_fn: SyncFn) -> Self {
        let notify = Arc::new(Notify::new());
        let stop_signal = notify.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_signal.notified() => return,
                    _ = ticker.tick() => {
                        let context = match &provider {
                            Some(provider) => match provider().await {
                                Ok(context) => context,
                                Err(e) => {
                                    warn!("auto-sync context provider failed: {e}");
                                    continue;
                                }
                            },
                            None => None,
                        };
                        sync_fn(context).await;
                    }
                }
            }
        });

        Self { notify, task }
    }

    pub async fn stop(self) {
        self.notify.notify_one();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn calls_sync_fn_on_each_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let sync_fn: SyncFn = Arc::new(move |_ctx| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        let handle = AutoSyncHandle::spawn(Duration::from_millis(15), None, sync_fn);
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn provider_error_does_not_stop_the_schedule() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let provider: ContextProviderFn = Arc::new(|| Box::pin(async { Err("boom".to_string()) }));
        let sync_fn: SyncFn = Arc::new(move |_ctx| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        let handle = AutoSyncHandle::spawn(Duration::from_millis(10), Some(provider), sync_fn);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        // The provider always errors, so sync_fn (which only runs on Ok)
        // should never fire, yet the schedule itself must not crash.
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
