//! Task Record
//!
//! The domain unit persisted locally and reconciled with the remote service.
//! Field names serialize in camelCase to match the remote `/tasks` API and
//! the inter-instance wire payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Storage column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse the storage column representation, defaulting to `Medium`
    pub fn from_str(value: &str) -> Self {
        match value {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

/// Synchronization state of a task relative to the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Confirmed applied on the remote service
    Synced,
    /// Locally mutated, remote confirmation outstanding
    #[default]
    Pending,
    /// A concurrent edit was detected and overwritten
    Conflict,
}

impl SyncStatus {
    /// Storage column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// Parse the storage column representation, defaulting to `Pending`
    pub fn from_str(value: &str) -> Self {
        match value {
            "synced" => SyncStatus::Synced,
            "conflict" => SyncStatus::Conflict,
            _ => SyncStatus::Pending,
        }
    }
}

/// A task record
///
/// The identifier is generated client-side at creation and immutable
/// afterwards. Every mutation refreshes `updated_at`, which doubles as the
/// last-write-wins tie-breaker when concurrent edits from sibling instances
/// collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique, stable, client-generated identifier
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Task {
    /// Create a new task with a fresh identifier and `Pending` sync status
    pub fn new(title: impl Into<String>) -> Self {
        let now = crate::model::now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            completed: false,
            priority: Priority::default(),
            category: None,
            due_date: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Builder-style priority setter
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style due-date setter
    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Whether `other` is a strictly newer revision of the same task
    pub fn is_superseded_by(&self, other: &Task) -> bool {
        self.id == other.id && other.updated_at > self.updated_at
    }
}
