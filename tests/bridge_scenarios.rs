// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios run against real host/client bridges over
//! localhost WebSocket connections — the cross-crate counterpart to each
//! crate's own `#[cfg(test)]` unit tests, exercising flows that span more
//! than one crate.

use std::sync::Arc;
use std::time::Duration;

use bridge_context::{ContextEngine, ContextEngineConfig, DeltaAction};
use bridge_core::{
    AllowAll, BridgeConfig, BridgeCore, BridgeError, ConnectConfig, ContextSharingConfig,
    ListenConfig, Mode,
};
use bridge_protocol::{TaskRequest, TaskResult, TaskScope};

fn host_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        mode: Some(Mode::Host),
        instance_name: "host".into(),
        listen: Some(ListenConfig::new("127.0.0.1", port)),
        connect: None,
        task_timeout: None,
        context_sharing: ContextSharingConfig::default(),
    }
}

fn client_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        mode: Some(Mode::Client),
        instance_name: "client".into(),
        listen: None,
        connect: Some(ConnectConfig {
            url: Some(format!("ws://127.0.0.1:{port}")),
            reconnect: false,
            ..ConnectConfig::default()
        }),
        task_timeout: None,
        context_sharing: ContextSharingConfig::default(),
    }
}

async fn wait_for_peer(bridge: &BridgeCore) {
    for _ in 0..200 {
        if bridge.get_peer_count().await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("peer never registered within 2s");
}

/// A delegated task is handled on the peer side and its result, including
/// the echoed data, comes back to the caller that delegated it.
#[tokio::test]
async fn echo_task_delegation() {
    let host = BridgeCore::new(host_config(19801), Arc::new(AllowAll)).unwrap();
    host.on_task_received(Arc::new(|task: TaskRequest| {
        Box::pin(async move {
            Ok(TaskResult::ok(
                task.id.clone(),
                serde_json::json!({"echoId": task.id}),
            ))
        })
    }))
    .await;
    host.start().await.unwrap();

    let client = BridgeCore::new(client_config(19801), Arc::new(AllowAll)).unwrap();
    client.start().await.unwrap();
    wait_for_peer(&host).await;

    let result = client
        .delegate_task(TaskRequest::new("t-1", "x", TaskScope::Execute), None)
        .await
        .unwrap();
    assert_eq!(result.task_id.as_deref(), Some("t-1"));
    assert!(result.success);
    assert_eq!(result.data["echoId"], "t-1");

    client.stop().await.unwrap();
    host.stop().await.unwrap();
}

/// Three concurrent delegations resolve to their own echoed id with no
/// cross-correlation, despite each handler invocation finishing at a
/// different time.
#[tokio::test]
async fn parallel_correlation_no_cross_talk() {
    let host = BridgeCore::new(host_config(19802), Arc::new(AllowAll)).unwrap();
    host.on_task_received(Arc::new(|task: TaskRequest| {
        Box::pin(async move {
            let delay_ms = match task.id.as_str() {
                "p-1" => 100,
                "p-2" => 50,
                "p-3" => 75,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(TaskResult::ok(
                task.id.clone(),
                serde_json::json!({"echoId": task.id}),
            ))
        })
    }))
    .await;
    host.start().await.unwrap();

    let client = BridgeCore::new(client_config(19802), Arc::new(AllowAll)).unwrap();
    client.start().await.unwrap();
    wait_for_peer(&host).await;

    let (r1, r2, r3) = tokio::join!(
        client.delegate_task(TaskRequest::new("p-1", "x", TaskScope::Execute), None),
        client.delegate_task(TaskRequest::new("p-2", "x", TaskScope::Execute), None),
        client.delegate_task(TaskRequest::new("p-3", "x", TaskScope::Execute), None),
    );

    assert_eq!(r1.unwrap().data["echoId"], "p-1");
    assert_eq!(r2.unwrap().data["echoId"], "p-2");
    assert_eq!(r3.unwrap().data["echoId"], "p-3");

    client.stop().await.unwrap();
    host.stop().await.unwrap();
}

/// A handler that outlives the caller's own timeout produces a `Timeout`
/// error within the deadline, not the handler's delay.
#[tokio::test]
async fn task_timeout_fails_before_the_handler_returns() {
    let host = BridgeCore::new(host_config(19803), Arc::new(AllowAll)).unwrap();
    host.on_task_received(Arc::new(|task: TaskRequest| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskResult::ok(task.id.clone(), serde_json::json!(null)))
        })
    }))
    .await;
    host.start().await.unwrap();

    let client = BridgeCore::new(client_config(19803), Arc::new(AllowAll)).unwrap();
    client.start().await.unwrap();
    wait_for_peer(&host).await;

    let mut task = TaskRequest::new("t-timeout", "x", TaskScope::Execute);
    task.timeout = Some(200);

    let started = tokio::time::Instant::now();
    let err = client.delegate_task(task, None).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert!(matches!(err, BridgeError::Timeout(200)));

    client.stop().await.unwrap();
    host.stop().await.unwrap();
}

/// Stopping the host mid-task fails the pending delegation on the client
/// side with a disconnect-like error.
#[tokio::test]
async fn host_stop_mid_task_fails_pending_delegate() {
    let host = BridgeCore::new(host_config(19804), Arc::new(AllowAll)).unwrap();
    host.on_task_received(Arc::new(|task: TaskRequest| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskResult::ok(task.id.clone(), serde_json::json!(null)))
        })
    }))
    .await;
    host.start().await.unwrap();

    let client = BridgeCore::new(client_config(19804), Arc::new(AllowAll)).unwrap();
    client.start().await.unwrap();
    wait_for_peer(&host).await;

    let task = TaskRequest::new("t-gone", "x", TaskScope::Execute);
    let delegate = tokio::spawn({
        let client = client.clone();
        async move { client.delegate_task(task, None).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    host.stop().await.unwrap();

    let err = delegate.await.unwrap().unwrap_err();
    assert!(err.is_disconnect_like());

    client.stop().await.unwrap();
}

/// A context query routed over the wire to a peer whose context handler
/// ranks `auth.ts` first for an authentication query.
#[tokio::test]
async fn context_request_ranks_auth_file_first() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("auth.ts"), "export function login() {}").unwrap();
    std::fs::write(
        dir.path().join("utils.ts"),
        "export function sum(a, b) { return a + b; }",
    )
    .unwrap();
    std::fs::write(dir.path().join("login.ts"), "export function handleLogin() {}").unwrap();

    let engine = Arc::new(ContextEngine::new(ContextEngineConfig::new(dir.path())));

    let host = BridgeCore::new(host_config(19805), Arc::new(AllowAll)).unwrap();
    host.on_context_requested(Arc::new(move |query: String| {
        let engine = engine.clone();
        Box::pin(async move { engine.query(&query, None).map_err(|e| e.to_string()) })
    }))
    .await;
    host.start().await.unwrap();

    let client = BridgeCore::new(client_config(19805), Arc::new(AllowAll)).unwrap();
    client.start().await.unwrap();
    wait_for_peer(&host).await;

    let chunks = client
        .request_context("fix authentication bug", None, 5_000)
        .await
        .unwrap();
    assert_eq!(chunks[0].path, "auth.ts");

    client.stop().await.unwrap();
    host.stop().await.unwrap();
}

/// Snapshotting, then mutating the tree, reports one `added` and one
/// `modified` change with a non-empty diff preview.
#[tokio::test]
async fn snapshot_delta_reports_added_and_modified_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.ts"), "one").unwrap();

    let engine = ContextEngine::new(ContextEngineConfig::new(dir.path()));
    let first = engine.snapshot().await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    std::fs::write(dir.path().join("b.ts"), "two").unwrap();
    std::fs::write(dir.path().join("a.ts"), "one but modified now").unwrap();

    let delta = engine.delta(first.id).await.unwrap();
    assert_eq!(delta.changes.len(), 2);
    assert!(delta
        .changes
        .iter()
        .any(|c| c.path == "b.ts" && c.action == DeltaAction::Added));
    let modified = delta
        .changes
        .iter()
        .find(|c| c.path == "a.ts")
        .expect("a.ts should be modified");
    assert_eq!(modified.action, DeltaAction::Modified);
    assert!(!modified.diff.as_deref().unwrap_or_default().is_empty());
}
