//! In-Process Pub/Sub Channel
//!
//! A `tokio::sync::broadcast` hub shared by every instance living in the
//! same process. This is the cheapest and most reliable channel and is
//! always available; it covers the case of several synchronization cores
//! hosted by one application process (and drives the in-process test
//! topology).
//!
//! The hub echoes sends back to their own sender; the central dedupe window
//! and the façade's self-origin filter take care of the echo.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::model::SyncMessage;
use crate::transport::MessageChannel;

/// Capacity of the hub's broadcast channel
const HUB_CAPACITY: usize = 256;

/// Shared in-process message hub
///
/// Create one per process (or per test topology) and hand a clone of the
/// `Arc` to every [`ProcessChannel`].
pub struct ProcessHub {
    bus: broadcast::Sender<SyncMessage>,
}

impl ProcessHub {
    /// Create a new hub
    pub fn new() -> Arc<Self> {
        let (bus, _) = broadcast::channel(HUB_CAPACITY);
        Arc::new(Self { bus })
    }
}

/// One instance's connection to the in-process hub
pub struct ProcessChannel {
    hub: Arc<ProcessHub>,
    forwarder: JoinHandle<()>,
}

impl ProcessChannel {
    /// Connect to the hub, forwarding its traffic into the inbound funnel
    pub fn connect(hub: Arc<ProcessHub>, inbound: mpsc::Sender<SyncMessage>) -> Self {
        let mut rx = hub.bus.subscribe();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if inbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[Transport] Process channel lagged, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { hub, forwarder }
    }
}

#[async_trait]
impl MessageChannel for ProcessChannel {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn send(&self, message: &SyncMessage) -> Result<(), SyncError> {
        // A hub with no other subscribers is not an error
        let _ = self.hub.bus.send(message.clone());
        Ok(())
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
