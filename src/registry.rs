//! # Instance Registry / Liveness Tracker
//!
//! Tracks which sibling instances are currently alive. Each instance owns a
//! heartbeat key in the settings keyspace and refreshes it on a timer;
//! peers count heartbeats within the liveness window and opportunistically
//! reap expired ones.
//!
//! ## Lifecycle
//!
//! ```text
//! STARTING -> ANNOUNCED -> ALIVE (heartbeat loop)
//!          -> DEPARTED (graceful shutdown, best-effort)
//! ```
//!
//! Peers additionally observe EXPIRED for an instance whose heartbeat aged
//! out; that is never a state the instance reports about itself. The
//! "instance connected" announcement and the shutdown close notice are
//! purely advisory: correctness relies on heartbeat expiry alone, because
//! ungraceful termination sends nothing.
//!
//! ## Ping/Pong Fallback
//!
//! Where the heartbeat keyspace is not shared (purely channel-connected
//! peers), [`InstanceRegistry::probe_peers`] broadcasts a correlated
//! liveness ping, collects pongs for a fixed window and reports
//! `1 + distinct respondents`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::model::{parse_ts, MessageKind, SyncMessage};
use crate::store::LocalStore;
use crate::transport::PeerTransport;

/// Delay before answering a liveness ping, avoids reply storms
const PONG_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle state of the local instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Starting,
    Announced,
    Alive,
    Departed,
}

impl InstanceState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => InstanceState::Announced,
            2 => InstanceState::Alive,
            3 => InstanceState::Departed,
            _ => InstanceState::Starting,
        }
    }
}

/// Liveness tracking for one running instance
pub struct InstanceRegistry {
    instance_id: String,
    store: Arc<LocalStore>,
    transport: Arc<PeerTransport>,
    liveness_window: Duration,
    ping_window: Duration,
    state: AtomicU8,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl InstanceRegistry {
    /// Generate the identifier for this process lifetime
    ///
    /// Opaque, sortable string: millisecond epoch plus random suffix.
    fn generate_instance_id() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "inst-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }

    /// Start the registry: record the first heartbeat, begin the refresh
    /// loop, answer peer pings, and announce this instance after a settle
    /// delay.
    pub async fn start(
        store: Arc<LocalStore>,
        transport: Arc<PeerTransport>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            instance_id: Self::generate_instance_id(),
            store,
            transport,
            liveness_window: config.liveness_window,
            ping_window: config.ping_window,
            state: AtomicU8::new(InstanceState::Starting as u8),
            background: std::sync::Mutex::new(Vec::new()),
        });

        if let Err(e) = registry.store.set_heartbeat(&registry.instance_id).await {
            tracing::warn!("[Registry] Initial heartbeat failed: {}", e);
        }
        tracing::info!("[Registry] Instance {} starting", registry.instance_id);

        let mut tasks = Vec::new();
        tasks.push(registry.clone().spawn_heartbeat_loop(config.heartbeat_interval));
        tasks.push(registry.clone().spawn_ping_responder());
        tasks.push(registry.clone().spawn_announcement(config.announce_delay));
        *registry.background.lock().unwrap() = tasks;

        registry
    }

    /// Identifier of this instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: InstanceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Count instances with a heartbeat inside the liveness window
    ///
    /// Side effect: expired heartbeat entries found during the scan are
    /// deleted (lazy reaping; there is no separate sweep process). The own
    /// heartbeat is refreshed first, so the result is at least 1.
    pub async fn active_instance_count(&self) -> usize {
        if let Err(e) = self.store.set_heartbeat(&self.instance_id).await {
            tracing::warn!("[Registry] Heartbeat refresh failed: {}", e);
        }

        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.liveness_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let mut live = 0usize;
        for (id, last_seen) in self.store.heartbeat_entries().await {
            if parse_ts(&last_seen) > cutoff {
                live += 1;
            } else {
                tracing::debug!("[Registry] Reaping expired heartbeat of {}", id);
                if let Err(e) = self.store.delete_heartbeat(&id).await {
                    tracing::warn!("[Registry] Heartbeat reap failed: {}", e);
                }
            }
        }

        tracing::debug!("[Registry] {} live instances detected", live);
        live
    }

    /// Ping/pong fallback liveness count
    ///
    /// Broadcasts a correlated `liveness-ping`, collects pongs for the ping
    /// window and reports `1 + distinct respondents`. Used where the
    /// heartbeat keyspace is not shared between peers.
    pub async fn probe_peers(&self) -> usize {
        let probe_id = Uuid::new_v4().simple().to_string();
        let mut replies = self.transport.subscribe();

        let ping = SyncMessage::new(
            MessageKind::LivenessPing,
            serde_json::json!({ "probeId": probe_id }),
            self.instance_id.clone(),
        );
        self.transport.send(&ping).await;

        let mut respondents: HashSet<String> = HashSet::new();
        let deadline = tokio::time::Instant::now() + self.ping_window;
        loop {
            let message = match tokio::time::timeout_at(deadline, replies.recv()).await {
                Ok(Ok(message)) => message,
                Ok(Err(_)) | Err(_) => break,
            };
            if message.kind != MessageKind::LivenessPong
                || message.origin_instance_id == self.instance_id
            {
                continue;
            }
            if message.payload.get("probeId").and_then(|v| v.as_str()) == Some(&probe_id) {
                respondents.insert(message.origin_instance_id);
            }
        }

        let count = 1 + respondents.len();
        tracing::debug!("[Registry] Ping probe {} found {} instances", probe_id, count);
        count
    }

    /// Graceful shutdown: stop timers, drop the own heartbeat, notify peers
    ///
    /// Best-effort only. Peers never rely on the close notice; an instance
    /// that dies without calling this simply expires.
    pub async fn shutdown(&self) {
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }

        if let Err(e) = self.store.delete_heartbeat(&self.instance_id).await {
            tracing::warn!("[Registry] Heartbeat removal failed: {}", e);
        }

        let notice = SyncMessage::new(
            MessageKind::ForceRefresh,
            serde_json::json!({ "reason": "instance-closing" }),
            self.instance_id.clone(),
        );
        self.transport.send(&notice).await;

        self.set_state(InstanceState::Departed);
        tracing::info!("[Registry] Instance {} departed", self.instance_id);
    }

    fn spawn_heartbeat_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The initial heartbeat was already recorded in start()
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.store.set_heartbeat(&self.instance_id).await {
                    tracing::warn!("[Registry] Heartbeat refresh failed: {}", e);
                    continue;
                }
                self.set_state(InstanceState::Alive);
            }
        })
    }

    fn spawn_ping_responder(self: Arc<Self>) -> JoinHandle<()> {
        let mut inbound = self.transport.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = inbound.recv().await {
                if message.kind != MessageKind::LivenessPing
                    || message.origin_instance_id == self.instance_id
                {
                    continue;
                }
                let probe_id = message
                    .payload
                    .get("probeId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();

                tokio::time::sleep(PONG_DELAY).await;
                let pong = SyncMessage::new(
                    MessageKind::LivenessPong,
                    serde_json::json!({ "probeId": probe_id }),
                    self.instance_id.clone(),
                );
                self.transport.send(&pong).await;
            }
        })
    }

    fn spawn_announcement(self: Arc<Self>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let hello = SyncMessage::new(
                MessageKind::DataChanged,
                serde_json::json!({ "action": "new-instance-connected" }),
                self.instance_id.clone(),
            );
            self.transport.send(&hello).await;
            // Advisory only; peers that miss it still see the heartbeat
            if self.state() == InstanceState::Starting {
                self.set_state(InstanceState::Announced);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::format_ts;
    use crate::transport::process::{ProcessChannel, ProcessHub};
    use crate::transport::{inbound_funnel, MessageChannel, PeerTransport};

    async fn test_setup() -> (tempfile::TempDir, Arc<LocalStore>, Arc<PeerTransport>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            LocalStore::open(dir.path().join("local.db")).await.unwrap(),
        );
        let hub = ProcessHub::new();
        let (tx, rx) = inbound_funnel();
        let transport = Arc::new(PeerTransport::assemble(
            vec![Box::new(ProcessChannel::connect(hub, tx)) as Box<dyn MessageChannel>],
            rx,
        ));
        (dir, store, transport)
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::builder()
            .heartbeat_interval(Duration::from_millis(50))
            .liveness_window(Duration::from_secs(30))
            .ping_window(Duration::from_millis(300))
            .announce_delay(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_self_counts_as_one() {
        let (_dir, store, transport) = test_setup().await;
        let registry = InstanceRegistry::start(store, transport, &fast_config()).await;
        assert_eq!(registry.active_instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_heartbeats_are_reaped() {
        let (_dir, store, transport) = test_setup().await;
        let registry =
            InstanceRegistry::start(store.clone(), transport, &fast_config()).await;

        // A live peer and one just past the liveness window
        store.set_heartbeat("inst-live-peer").await.unwrap();
        let expired = chrono::Utc::now() - chrono::Duration::seconds(31);
        store
            .set_setting("instance/inst-dead-peer", &format_ts(expired))
            .await
            .unwrap();

        assert_eq!(registry.active_instance_count().await, 2);

        // The expired entry was deleted during the scan
        let ids: Vec<String> = store
            .heartbeat_entries()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert!(!ids.contains(&"inst-dead-peer".to_string()));
    }

    #[tokio::test]
    async fn test_probe_peers_counts_distinct_respondents() {
        let (_dir, store, transport) = test_setup().await;
        let config = fast_config();
        let a = InstanceRegistry::start(store.clone(), transport.clone(), &config).await;
        let b = InstanceRegistry::start(store.clone(), transport.clone(), &config).await;

        // b's responder answers a's ping over the shared transport
        assert_eq!(a.probe_peers().await, 2);

        b.shutdown().await;
        // After b departed only a remains
        assert_eq!(a.probe_peers().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_removes_heartbeat_and_departs() {
        let (_dir, store, transport) = test_setup().await;
        let registry =
            InstanceRegistry::start(store.clone(), transport, &fast_config()).await;
        let id = registry.instance_id().to_string();

        registry.shutdown().await;
        assert_eq!(registry.state(), InstanceState::Departed);

        let ids: Vec<String> = store
            .heartbeat_entries()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert!(!ids.contains(&id));
    }
}
