//! # Pending-Operation Queue
//!
//! Queue operations for execution when the remote service is reachable.
//! Entries are drained oldest-first by the sync manager; a failed attempt
//! bumps the retry counter, and an entry that exhausts its retries is marked
//! failed and excluded from future drains. Abandoned entries stay in the
//! table as part of the audit trail; the user-facing trace is the
//! notification-log entry written by the sync manager.

use sqlx::Row;

use crate::error::SyncError;
use crate::model::{OperationKind, QueuedOperation};
use crate::store::LocalStore;

impl LocalStore {
    /// Queue a mutation for remote reconciliation
    pub async fn enqueue_operation(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Result<QueuedOperation, SyncError> {
        let op = QueuedOperation::new(kind, payload);
        let payload_json = serde_json::to_string(&op.payload)?;

        sqlx::query(
            "INSERT INTO sync_queue (id, kind, payload, created_at, retry_count, failed)
             VALUES (?, ?, ?, ?, 0, 0)",
        )
        .bind(&op.id)
        .bind(op.kind.as_str())
        .bind(&payload_json)
        .bind(&op.created_at)
        .execute(self.pool())
        .await?;

        tracing::debug!("[Store] Queued {} operation {}", op.kind.as_str(), op.id);
        Ok(op)
    }

    /// Snapshot of operations still eligible for reconciliation, oldest first
    ///
    /// Abandoned entries are excluded. Degrades to an empty list when the
    /// store is unavailable.
    pub async fn drain_queue_snapshot(&self) -> Vec<QueuedOperation> {
        match self.fetch_queue().await {
            Ok(ops) => ops,
            Err(e) => {
                tracing::warn!("[Store] Queue read failed, returning empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove an entry after confirmed remote application
    pub async fn complete_operation(&self, operation_id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(operation_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record a failed attempt and return the new retry count
    pub async fn record_operation_failure(
        &self,
        operation_id: &str,
        error_message: &str,
    ) -> Result<u32, SyncError> {
        sqlx::query(
            "UPDATE sync_queue SET
                retry_count = retry_count + 1,
                last_attempt = ?,
                last_error = ?
             WHERE id = ?",
        )
        .bind(crate::model::now_ts())
        .bind(error_message)
        .bind(operation_id)
        .execute(self.pool())
        .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT retry_count FROM sync_queue WHERE id = ?")
            .bind(operation_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count as u32)
    }

    /// Mark an entry as terminally failed, removing it from future drains
    pub async fn abandon_operation(&self, operation_id: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE sync_queue SET failed = 1 WHERE id = ?")
            .bind(operation_id)
            .execute(self.pool())
            .await?;
        tracing::warn!("[Store] Operation {} abandoned", operation_id);
        Ok(())
    }

    /// Remove every entry, including abandoned ones
    pub async fn clear_queue(&self) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_queue").execute(self.pool()).await?;
        tracing::debug!("[Store] Sync queue cleared");
        Ok(())
    }

    async fn fetch_queue(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        let rows = sqlx::query(
            "SELECT id, kind, payload, created_at, retry_count, last_attempt, last_error
             FROM sync_queue
             WHERE failed = 0
             ORDER BY created_at ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut operations = Vec::new();
        for row in rows {
            let kind_raw: String = row.try_get("kind")?;
            let Some(kind) = OperationKind::from_str(&kind_raw) else {
                // Entries written by a newer build; leave them for it
                tracing::warn!("[Store] Skipping queue entry with unknown kind {}", kind_raw);
                continue;
            };
            let payload_raw: String = row.try_get("payload")?;
            let Ok(payload) = serde_json::from_str(&payload_raw) else {
                tracing::warn!("[Store] Skipping queue entry with malformed payload");
                continue;
            };

            operations.push(QueuedOperation {
                id: row.try_get("id")?,
                kind,
                payload,
                created_at: row.try_get("created_at")?,
                retry_count: row.try_get::<i64, _>("retry_count")? as u32,
                last_attempt: row.try_get("last_attempt")?,
                last_error: row.try_get("last_error")?,
            });
        }

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::OperationKind;
    use crate::store::test_util::temp_store;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_enqueue_and_drain() {
        let (_dir, store) = temp_store().await;

        let op = store
            .enqueue_operation(OperationKind::Create, serde_json::json!({"id": "t1"}))
            .await
            .unwrap();

        let snapshot = store.drain_queue_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, op.id);
        assert_eq!(snapshot[0].kind, OperationKind::Create);
        assert_eq!(snapshot[0].task_id(), Some("t1"));

        store.complete_operation(&op.id).await.unwrap();
        assert!(store.drain_queue_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_order_is_oldest_first() {
        let (_dir, store) = temp_store().await;

        // Distinct created_at values by explicit payload marker
        for i in 0..3 {
            store
                .enqueue_operation(OperationKind::Update, serde_json::json!({"seq": i}))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let snapshot = store.drain_queue_snapshot().await;
        let seqs: Vec<i64> = snapshot
            .iter()
            .map(|op| op.payload["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_retry_counter_and_abandon() {
        let (_dir, store) = temp_store().await;

        let op = store
            .enqueue_operation(OperationKind::Delete, serde_json::json!({"id": "t1"}))
            .await
            .unwrap();

        assert_eq!(
            store.record_operation_failure(&op.id, "timeout").await.unwrap(),
            1
        );
        assert_eq!(
            store.record_operation_failure(&op.id, "timeout").await.unwrap(),
            2
        );

        let snapshot = store.drain_queue_snapshot().await;
        assert_eq!(snapshot[0].retry_count, 2);
        assert_eq!(snapshot[0].last_error.as_deref(), Some("timeout"));
        assert!(snapshot[0].last_attempt.is_some());

        store.abandon_operation(&op.id).await.unwrap();
        assert!(store.drain_queue_snapshot().await.is_empty());

        // The abandoned entry is excluded, not deleted
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.abandoned_operations, 1);
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let (_dir, store) = temp_store().await;
        store
            .enqueue_operation(OperationKind::Create, serde_json::json!({"id": "a"}))
            .await
            .unwrap();
        store.clear_queue().await.unwrap();
        assert!(store.drain_queue_snapshot().await.is_empty());
    }
}
