//! Domain Model
//!
//! Serde types shared by the store, the transport wire format, the remote API
//! client and the sync manager.
//!
//! # Module Structure
//!
//! - `task` - The domain record, its priority and sync-status tags
//! - `operation` - Queued, not-yet-confirmed mutations awaiting reconciliation
//! - `message` - The inter-instance wire format and message kinds
//! - `notification` - Entries of the local notification log
//!
//! # Timestamps
//!
//! Persisted and wire timestamps use fixed-width RFC 3339 with millisecond
//! precision and a `Z` suffix so that plain string comparison (in SQLite and
//! in last-write-wins merges) orders chronologically.

pub mod message;
pub mod notification;
pub mod operation;
pub mod task;

pub use message::{MessageKind, SyncMessage};
pub use notification::{NotificationEntry, NotificationKind};
pub use operation::{OperationKind, QueuedOperation};
pub use task::{Priority, SyncStatus, Task};

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp as fixed-width RFC 3339 (millisecond precision, `Z`)
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in the fixed-width storage format
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Current time truncated to the stored millisecond precision
///
/// Stamping with this keeps in-memory values identical to what a read-back
/// from the store returns.
pub fn now_millis() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
}

/// Parse a stored RFC 3339 timestamp, falling back to the Unix epoch
///
/// A malformed stored timestamp sorts before everything else instead of
/// failing the whole read.
pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}
