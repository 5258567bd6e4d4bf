//! Error Types
//!
//! This module defines the error taxonomy shared by every component of the
//! synchronization core.
//!
//! # Error Categories
//!
//! - `StoreUnavailable` - The durable local store is missing or a transaction failed
//! - `TransportUnavailable` - No inter-instance messaging channel could be constructed
//! - `RemoteUnavailable` - The remote service was unreachable or answered garbage
//! - `RetryExhausted` - A queued operation failed past the maximum retry count
//! - `Serialization` - JSON encoding/decoding failures
//! - `Config` - Invalid or missing configuration values
//!
//! # Propagation Policy
//!
//! Store reads degrade to empty results instead of returning `StoreUnavailable`;
//! store writes propagate it. Transport sends swallow failures (delivery is
//! best-effort). `RemoteUnavailable` never crosses the sync-manager boundary:
//! it becomes a failed-cycle lifecycle event and the operation stays queued.
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and can be safely shared across task
//! boundaries.

use thiserror::Error;

/// Errors produced by the synchronization core
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable local store is unavailable or a transaction failed
    #[error("local store unavailable: {message}")]
    StoreUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// No inter-instance messaging channel could be constructed
    #[error("no broadcast channel available: {message}")]
    TransportUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// The remote service is unreachable or returned an unusable response
    #[error("remote service unavailable: {message}")]
    RemoteUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// A queued operation exceeded its maximum retry count
    #[error("operation {operation_id} abandoned after {retries} retries")]
    RetryExhausted {
        /// Queue identifier of the abandoned operation
        operation_id: String,
        /// Number of attempts made before giving up
        retries: u32,
    },

    /// JSON serialization or deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new store-unavailable error
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a new transport-unavailable error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
        }
    }

    /// Create a new remote-unavailable error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error is transient and worth retrying on a later cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::StoreUnavailable { .. }
        )
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::remote(err.to_string())
    }
}
