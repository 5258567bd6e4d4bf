//! # Peer Broadcast Transport
//!
//! Best-effort message delivery between running instances over several
//! redundant channels. No single channel is required: sends go out over
//! every available channel independently, and inbound copies of the same
//! logical message are deduplicated centrally before consumers see them.
//!
//! ## Architecture
//!
//! Every concrete channel normalizes its inbound traffic into one
//! `mpsc` funnel. A single dispatcher task performs deduplication by
//! (origin instance, sender-stamped message id) and republishes unique
//! messages on a `tokio::sync::broadcast` bus consumers subscribe to. Every
//! channel carries the same stamped id, so redundant copies collapse while
//! distinct messages from the same millisecond never do. Deduplication,
//! like self-origin filtering in the façade, happens exactly once,
//! centrally, never per channel.
//!
//! ## Channels
//!
//! - [`process::ProcessChannel`] - in-process pub/sub hub
//! - [`spool::SpoolChannel`] - shared spool directory, polled
//! - [`relay::RelayChannel`] - TCP relay through a local background daemon
//!
//! ## Degraded Mode
//!
//! A channel that cannot be constructed is skipped at startup. Zero usable
//! channels is a distinct, observable state ([`PeerTransport::is_degraded`]):
//! sends become logged no-ops and synchronization degrades to
//! "works within a single instance" instead of crashing.
//!
//! ## Ordering
//!
//! Delivery order across channels is not guaranteed to match send order.
//! Consumers must stay idempotent under re-delivery and out-of-order
//! arrival; task applies resolve races last-write-wins by `updatedAt`.

pub mod process;
pub mod relay;
pub mod spool;

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::model::SyncMessage;

/// Capacity of the inbound funnel and the consumer bus
const BUS_CAPACITY: usize = 256;

/// How many recently seen message keys the dedupe window remembers
const DEDUPE_WINDOW: usize = 512;

/// One concrete delivery channel
///
/// Implementations are constructed fallibly at startup; construction also
/// wires their inbound side into the shared funnel. `send` failures are
/// per-channel and swallowed by the transport.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Short channel name for logs
    fn name(&self) -> &'static str;

    /// Attempt delivery over this channel
    async fn send(&self, message: &SyncMessage) -> Result<(), SyncError>;
}

/// Create the inbound funnel shared by all channels of one transport
pub fn inbound_funnel() -> (mpsc::Sender<SyncMessage>, mpsc::Receiver<SyncMessage>) {
    mpsc::channel(BUS_CAPACITY)
}

/// The redundant multi-channel transport
pub struct PeerTransport {
    channels: Vec<Box<dyn MessageChannel>>,
    bus: broadcast::Sender<SyncMessage>,
    dispatcher: JoinHandle<()>,
}

impl PeerTransport {
    /// Assemble a transport from the channels that could be constructed
    ///
    /// `inbound` is the receiver half of [`inbound_funnel`]; every channel
    /// was given the sender half. An empty channel list is accepted and puts
    /// the transport into degraded mode.
    pub fn assemble(
        channels: Vec<Box<dyn MessageChannel>>,
        mut inbound: mpsc::Receiver<SyncMessage>,
    ) -> Self {
        if channels.is_empty() {
            tracing::warn!(
                "[Transport] No broadcast channel available, running in single-instance mode"
            );
        } else {
            let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
            tracing::info!("[Transport] Channels available: {}", names.join(", "));
        }

        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let bus_tx = bus.clone();
        let dispatcher = tokio::spawn(async move {
            let mut window = DedupeWindow::new(DEDUPE_WINDOW);
            while let Some(message) = inbound.recv().await {
                if !window.insert(&message) {
                    tracing::trace!(
                        "[Transport] Dropped duplicate {:?} from {}",
                        message.kind,
                        message.origin_instance_id
                    );
                    continue;
                }
                // Receivers lagging or absent is fine, delivery is best-effort
                let _ = bus_tx.send(message);
            }
        });

        Self {
            channels,
            bus,
            dispatcher,
        }
    }

    /// Whether the transport has zero usable channels
    pub fn is_degraded(&self) -> bool {
        self.channels.is_empty()
    }

    /// Names of the usable channels, for diagnostics
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Broadcast a message over every available channel
    ///
    /// Never fails the caller: per-channel errors are logged, and in
    /// degraded mode the send is a logged no-op.
    pub async fn send(&self, message: &SyncMessage) {
        if self.channels.is_empty() {
            tracing::debug!("[Transport] Send dropped, no channels available");
            return;
        }

        for channel in &self.channels {
            if let Err(e) = channel.send(message).await {
                tracing::warn!("[Transport] Send via {} failed: {}", channel.name(), e);
            }
        }
    }

    /// Subscribe to deduplicated inbound messages from all channels
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.bus.subscribe()
    }

    /// Stop the dispatcher task
    pub fn shutdown(&self) {
        self.dispatcher.abort();
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Bounded set of recently seen message keys
struct DedupeWindow {
    seen: HashSet<(String, String)>,
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a message key; returns false when it was already seen
    fn insert(&mut self, message: &SyncMessage) -> bool {
        let key = message.dedupe_key();
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }
}
