//! # Synchronization Manager
//!
//! Background reconciliation between the local store and the remote
//! service. A sync cycle drains the pending-operation queue, then pulls
//! authoritative remote state, and reports its lifecycle on an event bus.
//!
//! ## Cycle States
//!
//! `IDLE -> SYNCING -> IDLE`. Syncing is explicitly non-reentrant: a
//! trigger that arrives while a cycle is running is dropped, not queued.
//!
//! ## Triggers
//!
//! - the periodic timer started by [`SyncManager::start_auto_sync`]
//! - the offline-to-online connectivity transition
//! - [`SyncManager::notify_foreground`], for hosts that track visibility
//! - the fire-and-forget attempt after each local mutation
//!
//! ## Failure Semantics
//!
//! Remote failures never propagate past the manager: a failed drain entry
//! stays queued with a bumped retry counter, a failed pull is logged, and
//! the cycle completes with [`SyncOutcome::Degraded`] plus a `SyncFailed`
//! lifecycle event. An entry that exhausts its retries is abandoned and
//! leaves exactly one error entry in the notification log as its audit
//! trail. Local read/write paths never wait for any of this.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::connectivity::ConnectionMonitor;
use crate::error::SyncError;
use crate::model::{
    NotificationEntry, NotificationKind, OperationKind, QueuedOperation, SyncStatus, Task,
};
use crate::remote::RemoteApi;
use crate::store::LocalStore;

/// Lifecycle events emitted to registered listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connectivity was regained
    Online,
    /// Connectivity was lost
    Offline,
    /// A sync cycle started
    SyncStart,
    /// The cycle completed with every step succeeding
    SyncSuccess,
    /// The cycle completed degraded; failed work stays queued
    SyncFailed {
        /// Description of the first failure encountered
        error: String,
    },
}

/// Result of one sync trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every queue entry and the pull succeeded
    Completed,
    /// The cycle ran but part of it failed; retried on a later cycle
    Degraded,
    /// Dropped: offline, or a cycle was already running
    Skipped,
}

/// Point-in-time synchronization status for the UI
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_operations: u64,
    pub last_sync_time: Option<String>,
    pub auto_sync_enabled: bool,
}

/// Orchestrates reconciliation with the remote service
pub struct SyncManager {
    store: Arc<LocalStore>,
    remote: RemoteApi,
    monitor: Arc<ConnectionMonitor>,
    events: broadcast::Sender<SyncEvent>,
    in_flight: AtomicBool,
    max_retries: u32,
    sync_interval: Duration,
    retry_delay: Duration,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncManager {
    /// Create a manager over the given store, remote client and monitor
    pub fn new(
        store: Arc<LocalStore>,
        remote: RemoteApi,
        monitor: Arc<ConnectionMonitor>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            remote,
            monitor,
            events,
            in_flight: AtomicBool::new(false),
            max_retries: config.max_retries,
            sync_interval: config.sync_interval,
            retry_delay: config.retry_delay,
            background: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether a cycle is currently running
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Run one sync cycle
    ///
    /// Never blocks local read/write paths and never returns an error:
    /// every failure is absorbed into the outcome and the event stream.
    pub async fn sync_cycle(&self) -> SyncOutcome {
        if !self.monitor.is_online() {
            tracing::debug!("[Sync] Offline, cycle skipped");
            return SyncOutcome::Skipped;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("[Sync] Cycle already running, trigger dropped");
            return SyncOutcome::Skipped;
        }

        self.emit(SyncEvent::SyncStart);
        tracing::info!("[Sync] Cycle started");

        let mut first_error: Option<String> = None;

        // 1. Drain the pending-operation queue
        for op in self.store.drain_queue_snapshot().await {
            match self.push_operation(&op).await {
                Ok(()) => {
                    if let Err(e) = self.store.complete_operation(&op.id).await {
                        tracing::warn!("[Sync] Could not remove completed entry: {}", e);
                    }
                    if op.kind != OperationKind::Delete {
                        if let Some(task_id) = op.task_id() {
                            let _ = self.store.mark_task_synced(task_id).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("[Sync] Operation {} failed: {}", op.id, e);
                    first_error.get_or_insert_with(|| e.to_string());
                    self.handle_operation_failure(&op, &e).await;
                }
            }
        }

        // 2. Pull authoritative remote state
        match self.remote.list_tasks().await {
            Ok(remote_tasks) => {
                let count = remote_tasks.len();
                for mut task in remote_tasks {
                    task.sync_status = SyncStatus::Synced;
                    if let Err(e) = self.store.apply_replicated_task(&task).await {
                        tracing::warn!("[Sync] Could not apply pulled task {}: {}", task.id, e);
                        first_error.get_or_insert_with(|| e.to_string());
                    }
                }
                let _ = self.store.set_last_sync_time().await;
                tracing::info!("[Sync] Pulled {} tasks from remote", count);
            }
            Err(e) => {
                tracing::warn!("[Sync] Pull failed, staying on local state: {}", e);
                first_error.get_or_insert_with(|| e.to_string());
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);

        match first_error {
            None => {
                self.emit(SyncEvent::SyncSuccess);
                tracing::info!("[Sync] Cycle completed");
                SyncOutcome::Completed
            }
            Some(error) => {
                self.emit(SyncEvent::SyncFailed { error });
                tracing::info!("[Sync] Cycle completed degraded");
                SyncOutcome::Degraded
            }
        }
    }

    /// Perform the remote call a queue entry represents
    async fn push_operation(&self, op: &QueuedOperation) -> Result<(), SyncError> {
        match op.kind {
            OperationKind::Create => {
                let task: Task = serde_json::from_value(op.payload.clone())?;
                self.remote.create_task(&task).await?;
            }
            OperationKind::Update => {
                let task: Task = serde_json::from_value(op.payload.clone())?;
                self.remote.update_task(&task).await?;
            }
            OperationKind::Delete => {
                let task_id = op
                    .task_id()
                    .ok_or_else(|| SyncError::serialization("delete payload missing id"))?;
                self.remote.delete_task(task_id).await?;
            }
        }
        Ok(())
    }

    /// Bump the retry counter; abandon and notify past the limit
    async fn handle_operation_failure(&self, op: &QueuedOperation, error: &SyncError) {
        let retries = match self
            .store
            .record_operation_failure(&op.id, &error.to_string())
            .await
        {
            Ok(retries) => retries,
            Err(e) => {
                tracing::warn!("[Sync] Could not record failure for {}: {}", op.id, e);
                return;
            }
        };

        if retries < self.max_retries {
            tracing::info!(
                "[Sync] Operation {} will be retried ({}/{})",
                op.id,
                retries,
                self.max_retries
            );
            return;
        }

        // Terminal: exclude from future drains, keep an audit trail
        let exhausted = SyncError::RetryExhausted {
            operation_id: op.id.clone(),
            retries,
        };
        tracing::error!("[Sync] {}", exhausted);

        if let Err(e) = self.store.abandon_operation(&op.id).await {
            tracing::warn!("[Sync] Could not abandon {}: {}", op.id, e);
        }
        let entry = NotificationEntry::new(
            NotificationKind::Error,
            "Synchronization failed",
            format!(
                "Could not sync {} operation after {} attempts",
                op.kind.as_str(),
                retries
            ),
        )
        .with_payload(serde_json::json!({
            "operationId": op.id,
            "kind": op.kind,
            "taskId": op.task_id(),
        }));
        if let Err(e) = self.store.log_notification(&entry).await {
            tracing::warn!("[Sync] Could not log terminal failure: {}", e);
        }
    }

    /// Save a task locally and queue it for reconciliation
    ///
    /// Local-first: the store write completes before any network work, and
    /// the sync attempt afterwards is fire-and-forget.
    pub async fn save_task(self: &Arc<Self>, task: &Task) -> Result<Task, SyncError> {
        let kind = if self.store.get_task(&task.id).await.is_some() {
            OperationKind::Update
        } else {
            OperationKind::Create
        };

        let saved = self.store.save_task(task).await?;
        self.store
            .enqueue_operation(kind, serde_json::to_value(&saved)?)
            .await?;

        self.trigger_after(self.retry_delay);
        Ok(saved)
    }

    /// Delete a task locally and queue the remote delete
    pub async fn delete_task(self: &Arc<Self>, task_id: &str) -> Result<(), SyncError> {
        self.store.delete_task(task_id).await?;
        self.store
            .enqueue_operation(OperationKind::Delete, serde_json::json!({ "id": task_id }))
            .await?;

        self.trigger_after(self.retry_delay);
        Ok(())
    }

    /// Fire-and-forget sync attempt
    pub fn trigger(self: &Arc<Self>) {
        self.trigger_after(Duration::ZERO);
    }

    fn trigger_after(self: &Arc<Self>, delay: Duration) {
        if !self.monitor.is_online() {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            manager.sync_cycle().await;
        });
    }

    /// Visibility trigger for hosts that track foreground state
    pub fn notify_foreground(self: &Arc<Self>) {
        if self.monitor.is_online() {
            tracing::debug!("[Sync] Foreground regained, checking for work");
            self.trigger();
        }
    }

    /// Start the periodic timer and the connectivity watcher
    pub fn start_auto_sync(self: &Arc<Self>) {
        let mut tasks = self.background.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }

        let manager = Arc::clone(self);
        let interval = self.sync_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                manager.sync_cycle().await;
            }
        }));

        let manager = Arc::clone(self);
        let mut connectivity = self.monitor.subscribe();
        tasks.push(tokio::spawn(async move {
            while connectivity.changed().await.is_ok() {
                let online = *connectivity.borrow_and_update();
                if online {
                    manager.emit(SyncEvent::Online);
                    tracing::info!("[Sync] Connectivity restored, triggering cycle");
                    manager.trigger();
                } else {
                    manager.emit(SyncEvent::Offline);
                }
            }
        }));

        tracing::info!("[Sync] Auto-sync every {:?}", self.sync_interval);
    }

    /// Stop the periodic timer and the connectivity watcher
    pub fn stop_auto_sync(&self) {
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }
        tracing::info!("[Sync] Auto-sync stopped");
    }

    /// Whether auto-sync is currently running
    pub fn auto_sync_enabled(&self) -> bool {
        !self.background.lock().unwrap().is_empty()
    }

    /// Drop the queue and resync everything from remote state
    pub async fn force_full_sync(self: &Arc<Self>) -> SyncOutcome {
        tracing::info!("[Sync] Forced full sync requested");
        if let Err(e) = self.store.clear_queue().await {
            tracing::warn!("[Sync] Could not clear queue: {}", e);
        }
        self.sync_cycle().await
    }

    /// Current synchronization status
    pub async fn sync_stats(&self) -> SyncStats {
        let pending = match self.store.stats().await {
            Ok(stats) => stats.pending_operations,
            Err(_) => 0,
        };
        SyncStats {
            is_online: self.monitor.is_online(),
            is_syncing: self.is_syncing(),
            pending_operations: pending,
            last_sync_time: self.store.get_last_sync_time().await,
            auto_sync_enabled: self.auto_sync_enabled(),
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager_for(server_uri: &str) -> (tempfile::TempDir, Arc<LocalStore>, Arc<SyncManager>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("local.db")).await.unwrap());
        let config = SyncConfig::builder()
            .api_base_url(server_uri)
            .max_retries(3)
            .build()
            .unwrap();
        let manager = SyncManager::new(
            store.clone(),
            RemoteApi::new(&config),
            ConnectionMonitor::new(),
            &config,
        );
        (dir, store, manager)
    }

    fn empty_list_mock() -> Mock {
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
    }

    #[tokio::test]
    async fn test_cycle_drains_create_and_marks_synced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "ignored",
                "title": "ignored",
                "createdAt": "2025-03-01T10:00:00Z",
                "updatedAt": "2025-03-01T10:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;
        empty_list_mock().mount(&server).await;

        let (_dir, store, manager) = manager_for(&server.uri()).await;
        let saved = manager.save_task(&Task::new("Alpha")).await.unwrap();
        assert_eq!(saved.sync_status, SyncStatus::Pending);

        let outcome = manager.sync_cycle().await;
        assert_eq!(outcome, SyncOutcome::Completed);
        assert!(store.drain_queue_snapshot().await.is_empty());
        assert_eq!(
            store.get_task(&saved.id).await.unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_offline_trigger_is_skipped() {
        let (_dir, _store, manager) = manager_for("http://127.0.0.1:9/api").await;
        manager.monitor.set_online(false);

        let mut events = manager.subscribe_events();
        assert_eq!(manager.sync_cycle().await, SyncOutcome::Skipped);
        // A skipped trigger emits no lifecycle events
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let (_dir, _store, manager) = manager_for(&server.uri()).await;

        let slow = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.sync_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.sync_cycle().await, SyncOutcome::Skipped);
        assert_eq!(slow.await.unwrap(), SyncOutcome::Completed);
    }

    #[tokio::test]
    async fn test_failed_pull_is_degraded_with_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, _store, manager) = manager_for(&server.uri()).await;
        let mut events = manager.subscribe_events();

        assert_eq!(manager.sync_cycle().await, SyncOutcome::Degraded);
        assert_eq!(events.recv().await.unwrap(), SyncEvent::SyncStart);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::SyncFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_save_task_chooses_create_then_update() {
        let server = MockServer::start().await;
        let (_dir, store, manager) = manager_for(&server.uri()).await;
        manager.monitor.set_online(false); // keep the queue untouched

        let task = manager.save_task(&Task::new("Alpha")).await.unwrap();
        // Distinct created_at values keep the drain order deterministic
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.save_task(&task).await.unwrap();

        let kinds: Vec<OperationKind> = store
            .drain_queue_snapshot()
            .await
            .iter()
            .map(|op| op.kind)
            .collect();
        assert_eq!(kinds, vec![OperationKind::Create, OperationKind::Update]);
    }

    #[tokio::test]
    async fn test_pull_marks_tasks_synced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "r1",
                "title": "From remote",
                "createdAt": "2025-03-01T10:00:00Z",
                "updatedAt": "2025-03-01T10:00:00Z",
                "syncStatus": "pending"
            }])))
            .mount(&server)
            .await;

        let (_dir, store, manager) = manager_for(&server.uri()).await;
        assert_eq!(manager.sync_cycle().await, SyncOutcome::Completed);

        let pulled = store.get_task("r1").await.unwrap();
        assert_eq!(pulled.sync_status, SyncStatus::Synced);
        assert!(store.get_last_sync_time().await.is_some());
    }
}
