//! Local Relay Channel
//!
//! Delivery through an optional background relay daemon listening on a
//! loopback TCP address. The wire format is newline-delimited JSON; the
//! daemon forwards every line to every other connected client.
//!
//! The daemon is an external collaborator and may simply not be installed:
//! when nothing is listening, construction fails and the transport skips
//! this channel.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::model::SyncMessage;
use crate::transport::MessageChannel;

/// How long to wait for the relay daemon before declaring it absent
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection to the local relay daemon
pub struct RelayChannel {
    writer: Mutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

impl RelayChannel {
    /// Connect to the relay daemon at `addr`
    ///
    /// Fails (making the channel unavailable, to be skipped) when nothing is
    /// listening within the connect timeout.
    pub async fn connect(
        addr: &str,
        inbound: mpsc::Sender<SyncMessage>,
    ) -> Result<Self, SyncError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::transport(format!("relay {} timed out", addr)))?
            .map_err(|e| SyncError::transport(format!("relay {} unreachable: {}", addr, e)))?;

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<SyncMessage>(&line) {
                        Ok(message) => {
                            if inbound.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("[Transport] Malformed relay line ignored: {}", e);
                        }
                    },
                    Ok(None) => {
                        tracing::info!("[Transport] Relay connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[Transport] Relay read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            writer: Mutex::new(write_half),
            reader,
        })
    }
}

#[async_trait]
impl MessageChannel for RelayChannel {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn send(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| SyncError::transport(format!("relay write failed: {}", e)))?;
        Ok(())
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
