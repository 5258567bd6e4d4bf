//! Connectivity Monitor
//!
//! Tracks whether the remote service is believed reachable. The host
//! application can push explicit online/offline signals (the equivalent of
//! platform connectivity events), and an optional background probe
//! periodically HEADs the API base URL with a bounded timeout.
//!
//! Observers subscribe to a `tokio::sync::watch` channel; the sync manager
//! uses the offline-to-online transition as a sync trigger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;

/// How often the background probe checks the remote service
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Online/offline state tracker
pub struct ConnectionMonitor {
    state: watch::Sender<bool>,
    prober: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Create a monitor that starts in the online state
    ///
    /// Starting optimistic matches the offline-first posture: the first
    /// failed sync flips the state rather than blocking the first attempt.
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(true);
        Arc::new(Self {
            state,
            prober: std::sync::Mutex::new(None),
        })
    }

    /// Current belief about connectivity
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Push an explicit connectivity signal from the host application
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(
                "[Connectivity] Now {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    /// Start the periodic background probe against the API base URL
    ///
    /// Each probe is a HEAD request bounded by the configured probe
    /// timeout; any response at all counts as online.
    pub fn start_probe(self: &Arc<Self>, config: &SyncConfig) {
        let url = config.api_url("/tasks");
        let timeout = config.probe_timeout;
        let monitor = Arc::clone(self);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let online = client.head(&url).send().await.is_ok();
                monitor.set_online(online);
            }
        });

        if let Some(previous) = self.prober.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background probe
    pub fn shutdown(&self) {
        if let Some(handle) = self.prober.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.prober.lock().unwrap().take() {
            handle.abort();
        }
    }
}
