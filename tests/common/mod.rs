//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use taskmesh::config::SyncConfig;
use taskmesh::core::SyncCore;
use taskmesh::transport::process::ProcessHub;

/// Route core tracing to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// An endpoint that refuses connections immediately, for offline scenarios
pub const UNREACHABLE_API: &str = "http://127.0.0.1:9/api";

/// Configuration with the slow timers tightened for tests
pub fn fast_config(db_path: PathBuf, api_base_url: &str) -> SyncConfig {
    SyncConfig::builder()
        .api_base_url(api_base_url)
        .db_path(db_path)
        .heartbeat_interval(Duration::from_millis(50))
        .liveness_window(Duration::from_secs(30))
        .ping_window(Duration::from_millis(300))
        .announce_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Start a core on an isolated hub shared within one test
pub async fn start_core(hub: &Arc<ProcessHub>, config: SyncConfig) -> SyncCore {
    init_tracing();
    let core = SyncCore::start_with_hub(config, hub.clone())
        .await
        .expect("core should start");
    // Tests drive connectivity explicitly
    core.monitor().shutdown();
    core
}

/// Give background delivery a moment to settle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// Longer settle covering the spool poll interval
pub async fn settle_spool() {
    tokio::time::sleep(Duration::from_millis(700)).await;
}
