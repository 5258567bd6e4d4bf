//! Notification Log Entries
//!
//! Persistent, user-visible notifications. The core only records *that* a
//! notification-worthy event occurred; rendering is the host application's
//! concern. The log is the audit trail for terminally failed sync
//! operations, which must never be dropped silently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification severity / category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

impl NotificationKind {
    /// Storage column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }

    /// Parse the storage column representation, defaulting to `Info`
    pub fn from_str(value: &str) -> Self {
        match value {
            "warning" => NotificationKind::Warning,
            "error" => NotificationKind::Error,
            _ => NotificationKind::Info,
        }
    }
}

/// One entry of the local notification log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: String,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    /// Optional structured context, e.g. the abandoned queue entry
    pub payload: Option<serde_json::Value>,
    /// Fixed-width RFC 3339 creation time
    pub created_at: String,
    pub is_read: bool,
}

impl NotificationEntry {
    /// Create an unread entry stamped with the current time
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            kind,
            payload: None,
            created_at: crate::model::now_ts(),
            is_read: false,
        }
    }

    /// Builder-style payload setter
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
