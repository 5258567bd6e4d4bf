//! Shared-Spool Channel
//!
//! Cross-process delivery through a shared spool directory: a send writes
//! one JSON file, peers poll the directory and pick up files they have not
//! seen. Message files expire after a short TTL and are reaped by whichever
//! poller sees them expired first.
//!
//! Files present before this channel started are treated as already seen,
//! so a joining instance does not replay stale traffic.

use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::SyncMessage;
use crate::transport::MessageChannel;

/// How often the spool directory is polled
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Age after which a message file is reaped
const SPOOL_TTL: Duration = Duration::from_secs(10);

/// Spool-directory channel
pub struct SpoolChannel {
    dir: PathBuf,
    poller: JoinHandle<()>,
}

impl SpoolChannel {
    /// Open the channel on a shared directory
    ///
    /// Fails (making the channel unavailable, to be skipped) when the
    /// directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, inbound: mpsc::Sender<SyncMessage>) -> Result<Self, SyncError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SyncError::transport(format!("cannot create spool dir: {}", e)))?;

        // Anything already spooled predates this instance
        let mut seen: HashSet<OsString> = list_message_files(&dir)
            .into_iter()
            .map(|p| p.file_name().map(OsString::from).unwrap_or_default())
            .collect();

        let poll_dir = dir.clone();
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                let files = list_message_files(&poll_dir);
                let current: HashSet<OsString> = files
                    .iter()
                    .filter_map(|p| p.file_name().map(OsString::from))
                    .collect();
                // Names of reaped files can be forgotten
                seen.retain(|name| current.contains(name));

                for path in files {
                    let Some(name) = path.file_name().map(OsString::from) else {
                        continue;
                    };
                    if seen.insert(name) {
                        match tokio::fs::read(&path).await {
                            Ok(bytes) => match serde_json::from_slice::<SyncMessage>(&bytes) {
                                Ok(message) => {
                                    if inbound.send(message).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("[Transport] Malformed spool file ignored: {}", e);
                                }
                            },
                            Err(e) => {
                                tracing::debug!("[Transport] Spool read race: {}", e);
                            }
                        }
                    }

                    if is_expired(&path) {
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }
        });

        Ok(Self { dir, poller })
    }
}

#[async_trait]
impl MessageChannel for SpoolChannel {
    fn name(&self) -> &'static str {
        "spool"
    }

    async fn send(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec(message)?;
        let path = self.dir.join(format!("{}.json", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SyncError::transport(format!("spool write failed: {}", e)))?;
        Ok(())
    }
}

impl Drop for SpoolChannel {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

fn list_message_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect()
}

fn is_expired(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > SPOOL_TTL)
}
