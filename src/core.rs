//! # Synchronization Core
//!
//! Composition root wiring the durable store, the peer transport, the
//! instance registry, connectivity monitoring, the sync manager and the
//! real-time façade into one running unit.
//!
//! ## Startup Order
//!
//! Store first (everything persists through it), then the transport from
//! whichever channels can be constructed, then the registry (needs both),
//! then the connectivity monitor and sync manager, and finally the façade
//! on top. Shutdown tears down in reverse.

use std::sync::{Arc, OnceLock};

use crate::config::SyncConfig;
use crate::connectivity::ConnectionMonitor;
use crate::error::SyncError;
use crate::realtime::RealtimeSync;
use crate::registry::InstanceRegistry;
use crate::remote::RemoteApi;
use crate::store::LocalStore;
use crate::sync::SyncManager;
use crate::transport::process::{ProcessChannel, ProcessHub};
use crate::transport::relay::RelayChannel;
use crate::transport::spool::SpoolChannel;
use crate::transport::{inbound_funnel, MessageChannel, PeerTransport};

/// Hub shared by every core hosted in this process
fn process_hub() -> Arc<ProcessHub> {
    static HUB: OnceLock<Arc<ProcessHub>> = OnceLock::new();
    HUB.get_or_init(ProcessHub::new).clone()
}

/// One running synchronization core
pub struct SyncCore {
    config: SyncConfig,
    store: Arc<LocalStore>,
    transport: Arc<PeerTransport>,
    registry: Arc<InstanceRegistry>,
    monitor: Arc<ConnectionMonitor>,
    manager: Arc<SyncManager>,
    realtime: Arc<RealtimeSync>,
}

impl SyncCore {
    /// Start a core on the process-wide hub
    pub async fn start(config: SyncConfig) -> Result<Self, SyncError> {
        Self::start_with_hub(config, process_hub()).await
    }

    /// Start a core on an explicit hub
    ///
    /// Lets a host (or a test topology) run several isolated meshes inside
    /// one process.
    pub async fn start_with_hub(
        config: SyncConfig,
        hub: Arc<ProcessHub>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let db_path = config.resolved_db_path();
        let store = Arc::new(LocalStore::open(&db_path).await?);
        tracing::info!("[Core] Store opened at {}", db_path.display());

        let (tx, rx) = inbound_funnel();
        let mut channels: Vec<Box<dyn MessageChannel>> =
            vec![Box::new(ProcessChannel::connect(hub, tx.clone()))];

        if let Some(spool_dir) = &config.spool_dir {
            match SpoolChannel::open(spool_dir, tx.clone()) {
                Ok(channel) => channels.push(Box::new(channel)),
                Err(e) => tracing::warn!("[Core] Spool channel unavailable: {}", e),
            }
        }
        if let Some(addr) = &config.relay_addr {
            match RelayChannel::connect(addr, tx.clone()).await {
                Ok(channel) => channels.push(Box::new(channel)),
                Err(e) => tracing::info!("[Core] Relay channel unavailable: {}", e),
            }
        }
        let transport = Arc::new(PeerTransport::assemble(channels, rx));

        let registry = InstanceRegistry::start(store.clone(), transport.clone(), &config).await;

        let monitor = ConnectionMonitor::new();
        monitor.start_probe(&config);

        let manager = SyncManager::new(
            store.clone(),
            RemoteApi::new(&config),
            monitor.clone(),
            &config,
        );
        manager.start_auto_sync();

        let realtime = RealtimeSync::start(store.clone(), transport.clone(), registry.clone());

        tracing::info!(
            "[Core] Instance {} ready, channels: {:?}",
            registry.instance_id(),
            transport.channel_names()
        );

        Ok(Self {
            config,
            store,
            transport,
            registry,
            monitor,
            manager,
            realtime,
        })
    }

    /// The configuration this core was started with
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Durable local store
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Background sync manager
    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Real-time messaging façade
    pub fn realtime(&self) -> &Arc<RealtimeSync> {
        &self.realtime
    }

    /// Instance registry
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Connectivity monitor
    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Identifier of this instance
    pub fn instance_id(&self) -> &str {
        self.registry.instance_id()
    }

    /// Graceful teardown in reverse startup order
    pub async fn shutdown(&self) {
        self.manager.stop_auto_sync();
        self.realtime.shutdown();
        self.registry.shutdown().await;
        self.monitor.shutdown();
        self.transport.shutdown();
        tracing::info!("[Core] Instance {} shut down", self.registry.instance_id());
    }
}
