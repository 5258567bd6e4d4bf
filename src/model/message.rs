//! Inter-Instance Wire Format
//!
//! The message envelope exchanged between running instances over the peer
//! broadcast transport. Messages are ephemeral: they exist only in transit
//! and are never persisted.
//!
//! # Wire Shape
//!
//! ```json
//! { "messageId": "9f2c41aa2e8b4f0f9d1c3b5a7e6d4c2b", "kind": "record-updated",
//!   "payload": {...}, "timestamp": 1741000000000,
//!   "originInstanceId": "inst-1741000000000-9f2c41aa" }
//! ```
//!
//! The sender stamps `messageId` once; every channel carries the same id,
//! which is what lets the transport collapse redundant deliveries without
//! ever collapsing distinct messages that happen to share a millisecond.
//! Consumers must ignore unknown `kind` values rather than error; they
//! deserialize into [`MessageKind::Unknown`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an inter-instance message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// A task was created locally on the origin instance
    RecordCreated,
    /// A task was updated locally on the origin instance
    RecordUpdated,
    /// A task was deleted locally on the origin instance
    RecordDeleted,
    /// Coarse-grained change signal; consumers reload rather than patch
    DataChanged,
    /// Request that all instances reload from their local store
    ForceRefresh,
    /// Liveness probe carrying a correlation id
    LivenessPing,
    /// Reply to a liveness probe
    LivenessPong,
    /// Any kind this build does not know; ignored, never an error
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Whether the kind belongs to the liveness ping/pong protocol
    pub fn is_liveness(&self) -> bool {
        matches!(self, MessageKind::LivenessPing | MessageKind::LivenessPong)
    }
}

/// A message in transit between instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Sender-generated identifier, shared by all channel copies
    pub message_id: String,
    pub kind: MessageKind,
    /// Opaque payload, interpreted per kind
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch, stamped by the sender
    pub timestamp: i64,
    /// Identifier of the instance that produced the message
    pub origin_instance_id: String,
}

impl SyncMessage {
    /// Create a message stamped with the current time
    pub fn new(
        kind: MessageKind,
        payload: serde_json::Value,
        origin_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().simple().to_string(),
            kind,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin_instance_id: origin_instance_id.into(),
        }
    }

    /// Deduplication key: two deliveries of the same logical message (via
    /// different channels) collapse to the same key, while distinct messages
    /// stamped within the same millisecond never do.
    pub fn dedupe_key(&self) -> (String, String) {
        (self.origin_instance_id.clone(), self.message_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&MessageKind::RecordCreated).unwrap();
        assert_eq!(json, "\"record-created\"");
        let json = serde_json::to_string(&MessageKind::LivenessPong).unwrap();
        assert_eq!(json, "\"liveness-pong\"");
    }

    #[test]
    fn test_unknown_kind_is_ignored_not_error() {
        let kind: MessageKind = serde_json::from_str("\"hologram-sync\"").unwrap();
        assert_eq!(kind, MessageKind::Unknown);
    }

    #[test]
    fn test_envelope_round_trip() {
        let msg = SyncMessage::new(
            MessageKind::RecordDeleted,
            serde_json::json!({"id": "t1"}),
            "inst-a",
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("originInstanceId"));
        let back: SyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_dedupe_key_matches_across_copies() {
        let msg = SyncMessage::new(MessageKind::DataChanged, serde_json::Value::Null, "inst-a");
        let copy = msg.clone();
        assert_eq!(msg.dedupe_key(), copy.dedupe_key());
    }

    #[test]
    fn test_distinct_messages_in_same_millisecond_have_distinct_keys() {
        let a = SyncMessage::new(
            MessageKind::RecordUpdated,
            serde_json::json!({"id": "t1"}),
            "inst-a",
        );
        let mut b = SyncMessage::new(
            MessageKind::RecordUpdated,
            serde_json::json!({"id": "t2"}),
            "inst-a",
        );
        b.timestamp = a.timestamp;
        assert_ne!(a.dedupe_key(), b.dedupe_key());
    }

    #[test]
    fn test_liveness_classification() {
        assert!(MessageKind::LivenessPing.is_liveness());
        assert!(MessageKind::LivenessPong.is_liveness());
        assert!(!MessageKind::RecordUpdated.is_liveness());
    }
}
