//! Sync cycle scenarios: offline capture, queue replay on reconnect,
//! retry exhaustion and pull conflict resolution.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use taskmesh::config::SyncConfig;
use taskmesh::connectivity::ConnectionMonitor;
use taskmesh::model::{NotificationKind, OperationKind, SyncStatus, Task};
use taskmesh::remote::RemoteApi;
use taskmesh::store::LocalStore;
use taskmesh::sync::{SyncManager, SyncOutcome};
use taskmesh::transport::process::ProcessHub;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn created_task_body() -> serde_json::Value {
    serde_json::json!({
        "id": "remote-echo",
        "title": "echo",
        "createdAt": "2025-03-01T10:00:00.000Z",
        "updatedAt": "2025-03-01T10:00:00.000Z"
    })
}

#[tokio::test]
async fn offline_writes_replay_when_connectivity_returns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_task_body()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let hub = ProcessHub::new();
    let core = common::start_core(
        &hub,
        common::fast_config(dir.path().join("a.db"), &server.uri()),
    )
    .await;

    // Capture two writes while offline: local state updates, nothing is sent
    core.monitor().set_online(false);
    common::settle().await;
    let t1 = core.sync().save_task(&Task::new("Buy milk")).await.unwrap();
    let t2 = core.sync().save_task(&Task::new("Call home")).await.unwrap();
    assert_eq!(t1.sync_status, SyncStatus::Pending);
    assert_eq!(core.sync().sync_stats().await.pending_operations, 2);

    // Reconnect: the connectivity transition triggers a cycle that drains
    // the queue in enqueue order
    core.monitor().set_online(true);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while core.sync().sync_stats().await.pending_operations > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue should drain after reconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for id in [&t1.id, &t2.id] {
        let task = core.store().get_task(id).await.unwrap();
        assert_eq!(task.sync_status, SyncStatus::Synced);
    }
    assert!(core.store().get_last_sync_time().await.is_some());

    core.shutdown().await;
}

#[tokio::test]
async fn failing_operation_is_abandoned_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("local.db")).await.unwrap());
    let config = SyncConfig::builder()
        .api_base_url(server.uri())
        .max_retries(3)
        .build()
        .unwrap();
    let manager = SyncManager::new(
        store.clone(),
        RemoteApi::new(&config),
        ConnectionMonitor::new(),
        &config,
    );

    let task = store.save_task(&Task::new("Doomed")).await.unwrap();
    store
        .enqueue_operation(OperationKind::Create, serde_json::to_value(&task).unwrap())
        .await
        .unwrap();

    // Each cycle fails the push once; the third failure abandons the entry
    for _ in 0..3 {
        assert_eq!(manager.sync_cycle().await, SyncOutcome::Degraded);
    }

    // Abandoned means excluded from future drains, not deleted
    assert!(store.drain_queue_snapshot().await.is_empty());

    // Exactly one terminal error entry in the notification log
    let unread = store.get_unread_notifications().await;
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].kind, NotificationKind::Error);

    // With nothing left to push, later cycles complete cleanly
    assert_eq!(manager.sync_cycle().await, SyncOutcome::Completed);
    assert_eq!(store.get_unread_notifications().await.len(), 1);
}

#[tokio::test]
async fn pull_keeps_newer_local_edits() {
    let server = MockServer::start().await;
    // The remote copy of t1 is years stale
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "t1",
                "title": "Remote stale",
                "createdAt": "2020-01-01T00:00:00.000Z",
                "updatedAt": "2020-01-01T00:00:00.000Z"
            },
            {
                "id": "t2",
                "title": "Remote only",
                "createdAt": "2025-03-01T10:00:00.000Z",
                "updatedAt": "2025-03-01T10:00:00.000Z"
            }
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("local.db")).await.unwrap());
    let config = SyncConfig::builder().api_base_url(server.uri()).build().unwrap();
    let manager = SyncManager::new(
        store.clone(),
        RemoteApi::new(&config),
        ConnectionMonitor::new(),
        &config,
    );

    let mut local = Task::new("Local newer");
    local.id = "t1".to_string();
    store.save_task(&local).await.unwrap();

    assert_eq!(manager.sync_cycle().await, SyncOutcome::Completed);

    // Last write wins: the stale remote copy loses, the unseen one lands
    let t1 = store.get_task("t1").await.unwrap();
    assert_eq!(t1.title, "Local newer");
    assert_eq!(t1.sync_status, SyncStatus::Pending);

    let t2 = store.get_task("t2").await.unwrap();
    assert_eq!(t2.title, "Remote only");
    assert_eq!(t2.sync_status, SyncStatus::Synced);
}
