//! # Settings Keyspace and Notification Log
//!
//! Key/value settings with update timestamps, the instance heartbeat keys
//! that live inside the settings keyspace, and the persistent notification
//! log.
//!
//! Heartbeat keys use the `instance/` prefix and are written with plain
//! single-key overwrite semantics, so multiple instances sharing one store
//! file can refresh their own key concurrently without coordination.

use sqlx::Row;

use crate::error::SyncError;
use crate::model::{NotificationEntry, NotificationKind};
use crate::store::LocalStore;

/// Prefix of heartbeat keys within the settings keyspace
pub const HEARTBEAT_KEY_PREFIX: &str = "instance/";

/// Settings key holding the last successful sync time
pub const LAST_SYNC_KEY: &str = "last_sync_time";

impl LocalStore {
    /// Set a setting value (single-key overwrite)
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(crate::model::now_ts())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Read a setting value
    ///
    /// Degrades to `None` when the store is unavailable.
    pub async fn get_setting(&self, key: &str) -> Option<String> {
        let result = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await;

        match result {
            Ok(row) => row.and_then(|r| r.try_get("value").ok()),
            Err(e) => {
                tracing::warn!("[Store] Setting read failed, returning none: {}", e);
                None
            }
        }
    }

    /// Remove a setting key
    pub async fn delete_setting(&self, key: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record the last successful sync as now
    pub async fn set_last_sync_time(&self) -> Result<(), SyncError> {
        self.set_setting(LAST_SYNC_KEY, &crate::model::now_ts()).await
    }

    /// Last successful sync time, when one has happened
    pub async fn get_last_sync_time(&self) -> Option<String> {
        self.get_setting(LAST_SYNC_KEY).await
    }

    /// Refresh the heartbeat key for an instance
    pub async fn set_heartbeat(&self, instance_id: &str) -> Result<(), SyncError> {
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, instance_id);
        self.set_setting(&key, &crate::model::now_ts()).await
    }

    /// Remove the heartbeat key for an instance (graceful shutdown)
    pub async fn delete_heartbeat(&self, instance_id: &str) -> Result<(), SyncError> {
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, instance_id);
        self.delete_setting(&key).await
    }

    /// All heartbeat entries as (instance id, last-seen timestamp) pairs
    ///
    /// Degrades to an empty list when the store is unavailable.
    pub async fn heartbeat_entries(&self) -> Vec<(String, String)> {
        let result = sqlx::query("SELECT key, value FROM settings WHERE key LIKE ?")
            .bind(format!("{}%", HEARTBEAT_KEY_PREFIX))
            .fetch_all(self.pool())
            .await;

        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    let key: String = row.try_get("key").ok()?;
                    let value: String = row.try_get("value").ok()?;
                    let id = key.strip_prefix(HEARTBEAT_KEY_PREFIX)?.to_string();
                    Some((id, value))
                })
                .collect(),
            Err(e) => {
                tracing::warn!("[Store] Heartbeat read failed, returning empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Append an entry to the notification log
    pub async fn log_notification(&self, entry: &NotificationEntry) -> Result<(), SyncError> {
        let payload_json = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT OR REPLACE INTO notifications
                (id, title, body, kind, payload, created_at, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(entry.kind.as_str())
        .bind(payload_json)
        .bind(&entry.created_at)
        .bind(entry.is_read)
        .execute(self.pool())
        .await?;

        tracing::debug!("[Store] Notification logged: {}", entry.title);
        Ok(())
    }

    /// Unread notification-log entries, oldest first
    ///
    /// Degrades to an empty list when the store is unavailable.
    pub async fn get_unread_notifications(&self) -> Vec<NotificationEntry> {
        let result = sqlx::query(
            "SELECT id, title, body, kind, payload, created_at, is_read
             FROM notifications WHERE is_read = 0 ORDER BY created_at ASC",
        )
        .fetch_all(self.pool())
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("[Store] Notification read failed, returning empty: {}", e);
                return Vec::new();
            }
        };

        rows.iter()
            .filter_map(|row| {
                let payload_raw: Option<String> = row.try_get("payload").ok()?;
                Some(NotificationEntry {
                    id: row.try_get("id").ok()?,
                    title: row.try_get("title").ok()?,
                    body: row.try_get("body").ok()?,
                    kind: NotificationKind::from_str(&row.try_get::<String, _>("kind").ok()?),
                    payload: payload_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
                    created_at: row.try_get("created_at").ok()?,
                    is_read: row.try_get("is_read").ok()?,
                })
            })
            .collect()
    }

    /// Mark one notification as read
    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(notification_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
