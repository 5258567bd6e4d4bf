//! Configuration
//!
//! Tunables for the synchronization core: remote endpoint, sync cadence,
//! retry policy, liveness windows and local storage locations. Built either
//! programmatically through [`SyncConfig::builder`] or from a TOML file.
//!
//! Defaults match the behavior the core was tuned for: a two-minute sync
//! interval, three retries per queued operation, ten-second heartbeats and a
//! thirty-second liveness window.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Configuration for a synchronization core instance
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote reconciliation API, e.g. `http://host/api`
    pub api_base_url: String,
    /// Interval between periodic sync cycles
    pub sync_interval: Duration,
    /// Maximum retries for one queued operation before it is abandoned
    pub max_retries: u32,
    /// Delay before the fire-and-forget sync attempt after a local write
    pub retry_delay: Duration,
    /// Interval between heartbeat refreshes
    pub heartbeat_interval: Duration,
    /// Heartbeats older than this do not count as live and are reaped
    pub liveness_window: Duration,
    /// Collection window for ping/pong liveness probes
    pub ping_window: Duration,
    /// Settle delay before announcing a new instance to its peers
    pub announce_delay: Duration,
    /// Bounded timeout for connectivity probes
    pub probe_timeout: Duration,
    /// Location of the SQLite store; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
    /// Shared spool directory for the storage-based broadcast channel
    pub spool_dir: Option<PathBuf>,
    /// Address of an optional local relay daemon, e.g. `127.0.0.1:7464`
    pub relay_addr: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            sync_interval: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            liveness_window: Duration::from_secs(30),
            ping_window: Duration::from_millis(1500),
            announce_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            db_path: None,
            spool_dir: None,
            relay_addr: None,
        }
    }
}

impl SyncConfig {
    /// Create a new [`SyncConfigBuilder`]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::config(format!("cannot read config file: {}", e)))?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| SyncError::config(format!("invalid config file: {}", e)))?;

        let mut config = Self::default();
        if let Some(url) = file.api_base_url {
            config.api_base_url = url;
        }
        if let Some(secs) = file.sync_interval_secs {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(n) = file.max_retries {
            config.max_retries = n;
        }
        if let Some(secs) = file.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.liveness_window_secs {
            config.liveness_window = Duration::from_secs(secs);
        }
        if let Some(path) = file.db_path {
            config.db_path = Some(path);
        }
        if let Some(path) = file.spool_dir {
            config.spool_dir = Some(path);
        }
        if let Some(addr) = file.relay_addr {
            config.relay_addr = Some(addr);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.api_base_url.is_empty() {
            return Err(SyncError::config("api_base_url must not be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(SyncError::config(format!(
                "api_base_url must be an http(s) URL: {}",
                self.api_base_url
            )));
        }
        if self.liveness_window < self.heartbeat_interval {
            return Err(SyncError::config(
                "liveness_window must be at least the heartbeat_interval",
            ));
        }
        Ok(())
    }

    /// Resolved path of the SQLite store file
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("taskmesh");
            path.push("local.db");
            path
        })
    }

    /// Full URL for an API route
    pub fn api_url(&self, route: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), route)
    }
}

/// Raw TOML file shape; durations are plain seconds
#[derive(Debug, Deserialize)]
struct ConfigFile {
    api_base_url: Option<String>,
    sync_interval_secs: Option<u64>,
    max_retries: Option<u32>,
    heartbeat_interval_secs: Option<u64>,
    liveness_window_secs: Option<u64>,
    db_path: Option<PathBuf>,
    spool_dir: Option<PathBuf>,
    relay_addr: Option<String>,
}

/// Builder for [`SyncConfig`]
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Set the remote API base URL
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    /// Set the periodic sync interval
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    /// Set the maximum retry count per queued operation
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the heartbeat refresh interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the liveness window
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.config.liveness_window = window;
        self
    }

    /// Set the ping/pong collection window
    pub fn ping_window(mut self, window: Duration) -> Self {
        self.config.ping_window = window;
        self
    }

    /// Set the announce settle delay
    pub fn announce_delay(mut self, delay: Duration) -> Self {
        self.config.announce_delay = delay;
        self
    }

    /// Set the SQLite store location
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    /// Set the shared spool directory
    pub fn spool_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.spool_dir = Some(path.into());
        self
    }

    /// Set the local relay daemon address
    pub fn relay_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.relay_addr = Some(addr.into());
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(120));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.liveness_window, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SyncConfig::builder()
            .api_base_url("https://example.com/api/")
            .max_retries(5)
            .sync_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.api_url("/tasks"), "https://example.com/api/tasks");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = SyncConfig::builder().api_base_url("ftp://nope").build();
        assert!(matches!(result, Err(SyncError::Config { .. })));
    }

    #[test]
    fn test_liveness_window_must_cover_heartbeat() {
        let result = SyncConfig::builder()
            .heartbeat_interval(Duration::from_secs(30))
            .liveness_window(Duration::from_secs(10))
            .build();
        assert!(matches!(result, Err(SyncError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmesh.toml");
        std::fs::write(
            &path,
            "api_base_url = \"http://10.0.0.2/api\"\nmax_retries = 7\nliveness_window_secs = 45\n",
        )
        .unwrap();
        let config = SyncConfig::from_file(&path).unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.2/api");
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.liveness_window, Duration::from_secs(45));
        // untouched keys keep their defaults
        assert_eq!(config.sync_interval, Duration::from_secs(120));
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "api_base_url = [not toml").unwrap();
        assert!(SyncConfig::from_file(&path).is_err());
    }
}
