//! Pending Operations
//!
//! A queued, not-yet-confirmed mutation awaiting remote reconciliation.
//! Entries are created whenever a task is mutated locally and removed once
//! the remote service confirms the corresponding call. Entries that fail
//! past the retry limit are marked failed and excluded from future drains;
//! the notification log keeps the audit trail.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of remote mutation a queue entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Storage column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Parse the storage column representation
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OperationKind::Create),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

/// One entry of the pending-operation queue
///
/// The payload is a snapshot of the task (or `{ "id": ... }` for deletes)
/// taken at mutation time. Later operations for the same task logically
/// supersede earlier ones; the queue may physically hold several.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Queue entry identifier, distinct from the task id
    pub id: String,
    pub kind: OperationKind,
    /// JSON snapshot of the task at mutation time
    pub payload: serde_json::Value,
    /// Fixed-width RFC 3339 creation time
    pub created_at: String,
    pub retry_count: u32,
    /// Fixed-width RFC 3339 time of the last failed attempt
    pub last_attempt: Option<String>,
    /// Message of the last failure, for the audit trail
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Create a fresh queue entry with a zeroed retry counter
    pub fn new(kind: OperationKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: crate::model::now_ts(),
            retry_count: 0,
            last_attempt: None,
            last_error: None,
        }
    }

    /// Task id carried by the payload, when present
    pub fn task_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_operation() {
        let op = QueuedOperation::new(
            OperationKind::Create,
            serde_json::json!({"id": "t1", "title": "Alpha"}),
        );
        assert_eq!(op.kind, OperationKind::Create);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.task_id(), Some("t1"));
        assert!(op.last_attempt.is_none());
    }

    #[test]
    fn test_task_id_missing() {
        let op = QueuedOperation::new(OperationKind::Delete, serde_json::json!({}));
        assert_eq!(op.task_id(), None);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(OperationKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::from_str("merge"), None);
    }
}
