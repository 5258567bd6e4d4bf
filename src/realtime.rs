//! # Real-Time Sync Façade
//!
//! The surface application code talks to for cross-instance messaging.
//! Outbound, it stamps messages with the local origin and hands them to the
//! transport. Inbound, it filters the instance's own messages, applies
//! record mutations to the local store through the replicated path, and
//! then fans the message out to registered handlers.
//!
//! ## Loop Prevention
//!
//! Two rules keep the mesh loop-free. Self-origin filtering happens here,
//! exactly once, before any handler or store apply runs. And inbound record
//! mutations go through the store's replicated path, which emits no change
//! events, so an applied peer mutation is never re-broadcast.
//!
//! ## Handlers
//!
//! Handlers register per message kind or as wildcards, and are removed via
//! the [`HandlerId`] token returned at registration. A handler returning an
//! error never disturbs its siblings; the failure is logged and dispatch
//! continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::model::{MessageKind, SyncMessage, SyncStatus, Task};
use crate::registry::InstanceRegistry;
use crate::store::{LocalStore, StoreEvent};
use crate::transport::PeerTransport;

/// Token identifying one registered handler, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&SyncMessage) -> Result<(), SyncError> + Send + Sync>;

/// Handlers keyed by kind; `None` holds the wildcard handlers
type HandlerMap = HashMap<Option<MessageKind>, Vec<(HandlerId, Handler)>>;

/// Cross-instance messaging surface
pub struct RealtimeSync {
    instance_id: String,
    transport: Arc<PeerTransport>,
    store: Arc<LocalStore>,
    registry: Arc<InstanceRegistry>,
    handlers: Arc<RwLock<HandlerMap>>,
    next_handler: AtomicU64,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeSync {
    /// Start the façade: wire inbound dispatch and the outbound relay of
    /// local store changes.
    pub fn start(
        store: Arc<LocalStore>,
        transport: Arc<PeerTransport>,
        registry: Arc<InstanceRegistry>,
    ) -> Arc<Self> {
        let facade = Arc::new(Self {
            instance_id: registry.instance_id().to_string(),
            transport,
            store,
            registry,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_handler: AtomicU64::new(1),
            background: std::sync::Mutex::new(Vec::new()),
        });

        let tasks = vec![
            facade.clone().spawn_inbound_dispatch(),
            facade.clone().spawn_store_relay(),
        ];
        *facade.background.lock().unwrap() = tasks;

        tracing::info!("[Realtime] Façade started for {}", facade.instance_id);
        facade
    }

    /// Identifier of the local instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Broadcast a message to sibling instances
    ///
    /// The origin and timestamp are stamped here; callers only choose kind
    /// and payload. Best-effort: in degraded transport mode this is a no-op.
    pub async fn broadcast(&self, kind: MessageKind, payload: serde_json::Value) {
        let message = SyncMessage::new(kind, payload, self.instance_id.clone());
        self.transport.send(&message).await;
    }

    /// Register a handler for one message kind
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&SyncMessage) -> Result<(), SyncError> + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a wildcard handler, invoked for every inbound message
    pub fn on_any<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&SyncMessage) -> Result<(), SyncError> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, key: Option<MessageKind>, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap()
            .entry(key)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a previously registered handler
    ///
    /// Returns false when the token is unknown (already removed). Safe to
    /// call from inside a handler; a dispatch already in flight may still
    /// deliver its current message.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        for bucket in handlers.values_mut() {
            if let Some(pos) = bucket.iter().position(|(hid, _)| *hid == id) {
                bucket.remove(pos);
                return true;
            }
        }
        false
    }

    /// Announce a locally created task
    pub async fn task_created(&self, task: &Task) {
        self.broadcast_task(MessageKind::RecordCreated, task).await;
    }

    /// Announce a locally updated task
    pub async fn task_updated(&self, task: &Task) {
        self.broadcast_task(MessageKind::RecordUpdated, task).await;
    }

    /// Announce a locally deleted task
    pub async fn task_deleted(&self, task_id: &str) {
        self.broadcast(
            MessageKind::RecordDeleted,
            serde_json::json!({ "id": task_id }),
        )
        .await;
    }

    /// Announce an unspecified data change peers should react to
    pub async fn data_changed(&self, payload: serde_json::Value) {
        self.broadcast(MessageKind::DataChanged, payload).await;
    }

    /// Ask every sibling instance to reload from its local store
    pub async fn force_refresh(&self, reason: &str) {
        self.broadcast(
            MessageKind::ForceRefresh,
            serde_json::json!({ "reason": reason }),
        )
        .await;
    }

    async fn broadcast_task(&self, kind: MessageKind, task: &Task) {
        match serde_json::to_value(task) {
            Ok(payload) => self.broadcast(kind, payload).await,
            Err(e) => tracing::warn!("[Realtime] Could not serialize task: {}", e),
        }
    }

    /// Number of instances currently considered alive
    pub async fn active_instance_count(&self) -> usize {
        self.registry.active_instance_count().await
    }

    /// Stop dispatch and the store relay
    pub fn shutdown(&self) {
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }
        tracing::info!("[Realtime] Façade stopped");
    }

    /// Inbound side: transport bus -> store apply -> handlers
    fn spawn_inbound_dispatch(self: Arc<Self>) -> JoinHandle<()> {
        let mut inbound = self.transport.subscribe();
        tokio::spawn(async move {
            loop {
                let message = match inbound.recv().await {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[Realtime] Dispatch lagged, {} messages dropped", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                if message.origin_instance_id == self.instance_id {
                    continue;
                }
                if message.kind == MessageKind::Unknown {
                    tracing::debug!("[Realtime] Ignoring message of unknown kind");
                    continue;
                }
                // Liveness traffic belongs to the registry
                if message.kind.is_liveness() {
                    continue;
                }

                self.apply_record_mutation(&message).await;
                self.run_handlers(&message);
            }
        })
    }

    /// Apply an inbound record mutation through the replicated store path
    async fn apply_record_mutation(&self, message: &SyncMessage) {
        match message.kind {
            MessageKind::RecordCreated | MessageKind::RecordUpdated => {
                let mut task: Task = match serde_json::from_value(message.payload.clone()) {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::warn!("[Realtime] Malformed record payload ignored: {}", e);
                        return;
                    }
                };
                task.sync_status = SyncStatus::Synced;
                match self.store.apply_replicated_task(&task).await {
                    Ok(true) => {
                        tracing::debug!("[Realtime] Applied {} from {}", task.id, message.origin_instance_id)
                    }
                    Ok(false) => {
                        tracing::debug!("[Realtime] Stale copy of {} discarded", task.id)
                    }
                    Err(e) => tracing::warn!("[Realtime] Replicated apply failed: {}", e),
                }
            }
            MessageKind::RecordDeleted => {
                let Some(task_id) = message.payload.get("id").and_then(|v| v.as_str()) else {
                    tracing::warn!("[Realtime] Delete without id ignored");
                    return;
                };
                if let Err(e) = self.store.apply_replicated_delete(task_id).await {
                    tracing::warn!("[Realtime] Replicated delete failed: {}", e);
                }
            }
            _ => {}
        }
    }

    fn run_handlers(&self, message: &SyncMessage) {
        // Snapshot the matching handlers before invoking any of them, so a
        // handler may call on()/off() without deadlocking against this lock
        let matching: Vec<(HandlerId, Handler)> = {
            let handlers = self.handlers.read().unwrap();
            [Some(message.kind), None]
                .into_iter()
                .filter_map(|key| handlers.get(&key))
                .flat_map(|bucket| bucket.iter().cloned())
                .collect()
        };

        for (id, handler) in matching {
            if let Err(e) = handler(message) {
                // One failing handler never disturbs its siblings
                tracing::warn!("[Realtime] Handler {:?} failed: {}", id, e);
            }
        }
    }

    /// Outbound side: local store changes become record-* broadcasts
    ///
    /// Only the local write path emits store events; replicated applies are
    /// silent, so this relay cannot echo a peer's mutation back out.
    fn spawn_store_relay(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.store.subscribe_changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(StoreEvent::TaskSaved { task, created }) => {
                        if created {
                            self.task_created(&task).await;
                        } else {
                            self.task_updated(&task).await;
                        }
                    }
                    Ok(StoreEvent::TaskDeleted { task_id }) => {
                        self.task_deleted(&task_id).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[Realtime] Store relay lagged, {} events dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for RealtimeSync {
    fn drop(&mut self) {
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}
