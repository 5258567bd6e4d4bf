//! # Local Task Operations
//!
//! CRUD for the tasks collection plus the replicated apply path used when a
//! change arrives from a sibling instance or from the remote pull.
//!
//! ## Two Write Paths
//!
//! - **Local writes** ([`LocalStore::save_task`], [`LocalStore::delete_task`])
//!   refresh `updated_at`, force `sync_status = pending` and publish a
//!   [`StoreEvent`](crate::store::StoreEvent) so observers and sibling
//!   instances learn about the change.
//! - **Replicated applies** ([`LocalStore::apply_replicated_task`],
//!   [`LocalStore::apply_replicated_delete`]) keep the incoming timestamps,
//!   merge last-write-wins by `updated_at`, and emit nothing. Applying the
//!   same message twice is a no-op, which makes duplicate delivery across
//!   redundant channels safe.

use sqlx::Row;

use crate::error::SyncError;
use crate::model::{format_ts, parse_ts, Priority, SyncStatus, Task};
use crate::store::{LocalStore, StoreEvent};

impl LocalStore {
    /// Save a locally mutated task
    ///
    /// Refreshes `updated_at`, marks the task `pending` until remote
    /// confirmation and publishes a change event.
    pub async fn save_task(&self, task: &Task) -> Result<Task, SyncError> {
        let mut stamped = task.clone();
        stamped.updated_at = crate::model::now_millis();
        stamped.sync_status = SyncStatus::Pending;

        let created = self.fetch_task(&stamped.id).await?.is_none();
        self.upsert_task(&stamped).await?;

        tracing::debug!(
            "[Store] Task {} {}",
            stamped.id,
            if created { "created" } else { "updated" }
        );
        self.emit(StoreEvent::TaskSaved {
            task: stamped.clone(),
            created,
        });
        Ok(stamped)
    }

    /// Save a batch of locally mutated tasks
    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<(), SyncError> {
        for task in tasks {
            self.save_task(task).await?;
        }
        Ok(())
    }

    /// All tasks, oldest first
    ///
    /// Degrades to an empty list when the store is unavailable.
    pub async fn get_tasks(&self) -> Vec<Task> {
        match self.fetch_tasks(None).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("[Store] Task read failed, returning empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Tasks filtered by sync status, oldest first
    ///
    /// Degrades to an empty list when the store is unavailable.
    pub async fn get_tasks_by_status(&self, status: SyncStatus) -> Vec<Task> {
        match self.fetch_tasks(Some(status)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("[Store] Task read failed, returning empty: {}", e);
                Vec::new()
            }
        }
    }

    /// A single task by id
    ///
    /// Degrades to `None` when the store is unavailable.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        match self.fetch_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("[Store] Task read failed, returning none: {}", e);
                None
            }
        }
    }

    /// Delete a task locally and publish a change event
    ///
    /// Returns whether a row was actually removed.
    pub async fn delete_task(&self, task_id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(self.pool())
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::debug!("[Store] Task {} deleted", task_id);
            self.emit(StoreEvent::TaskDeleted {
                task_id: task_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Mark a task as confirmed by the remote service
    ///
    /// Leaves `updated_at` untouched so the confirmation does not look like
    /// a newer edit to sibling instances.
    pub async fn mark_task_synced(&self, task_id: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE tasks SET sync_status = 'synced' WHERE id = ?")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Apply a task received from a sibling instance or the remote pull
    ///
    /// Last-write-wins: the incoming revision is written only when its
    /// `updated_at` is not older than the stored one. Keeps the incoming
    /// timestamps, emits no change event, and is idempotent under duplicate
    /// delivery. Returns whether the incoming revision won.
    pub async fn apply_replicated_task(&self, task: &Task) -> Result<bool, SyncError> {
        let result = sqlx::query(
            "INSERT INTO tasks (
                id, title, description, completed, priority, category,
                due_date, created_at, updated_at, sync_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                completed = excluded.completed,
                priority = excluded.priority,
                category = excluded.category,
                due_date = excluded.due_date,
                updated_at = excluded.updated_at,
                sync_status = excluded.sync_status
            WHERE excluded.updated_at >= tasks.updated_at",
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(task.priority.as_str())
        .bind(&task.category)
        .bind(task.due_date.map(format_ts))
        .bind(format_ts(task.created_at))
        .bind(format_ts(task.updated_at))
        .bind(task.sync_status.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a delete received from a sibling instance
    ///
    /// Emits no change event; idempotent. Returns whether a row was removed.
    pub async fn apply_replicated_delete(&self, task_id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unconditional upsert used by the local write path
    async fn upsert_task(&self, task: &Task) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO tasks (
                id, title, description, completed, priority, category,
                due_date, created_at, updated_at, sync_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(task.priority.as_str())
        .bind(&task.category)
        .bind(task.due_date.map(format_ts))
        .bind(format_ts(task.created_at))
        .bind(format_ts(task.updated_at))
        .bind(task.sync_status.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn fetch_tasks(&self, status: Option<SyncStatus>) -> Result<Vec<Task>, SyncError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, title, description, completed, priority, category,
                            due_date, created_at, updated_at, sync_status
                     FROM tasks WHERE sync_status = ? ORDER BY created_at ASC",
                )
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, title, description, completed, priority, category,
                            due_date, created_at, updated_at, sync_status
                     FROM tasks ORDER BY created_at ASC",
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn fetch_task(&self, task_id: &str) -> Result<Option<Task>, SyncError> {
        let row = sqlx::query(
            "SELECT id, title, description, completed, priority, category,
                    due_date, created_at, updated_at, sync_status
             FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, SyncError> {
        Ok(Task {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            completed: row.try_get("completed")?,
            priority: Priority::from_str(&row.try_get::<String, _>("priority")?),
            category: row.try_get("category")?,
            due_date: row
                .try_get::<Option<String>, _>("due_date")?
                .as_deref()
                .map(parse_ts),
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?),
            sync_status: SyncStatus::from_str(&row.try_get::<String, _>("sync_status")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{SyncStatus, Task};
    use crate::store::test_util::temp_store;
    use crate::store::StoreEvent;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_and_fetch_task() {
        let (_dir, store) = temp_store().await;

        let task = Task::new("Write report");
        let saved = store.save_task(&task).await.unwrap();
        assert_eq!(saved.sync_status, SyncStatus::Pending);

        let fetched = store.get_task(&task.id).await.unwrap();
        assert_eq!(fetched.title, "Write report");
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn test_save_marks_pending_and_refreshes_updated_at() {
        let (_dir, store) = temp_store().await;

        let mut task = Task::new("Alpha");
        task.sync_status = SyncStatus::Synced;
        let before = task.updated_at;

        let saved = store.save_task(&task).await.unwrap();
        assert_eq!(saved.sync_status, SyncStatus::Pending);
        assert!(saved.updated_at >= before);
    }

    #[tokio::test]
    async fn test_save_emits_created_then_updated_events() {
        let (_dir, store) = temp_store().await;
        let mut events = store.subscribe_changes();

        let task = store.save_task(&Task::new("Alpha")).await.unwrap();
        store.save_task(&task).await.unwrap();

        match events.recv().await.unwrap() {
            StoreEvent::TaskSaved { created, .. } => assert!(created),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.recv().await.unwrap() {
            StoreEvent::TaskSaved { created, .. } => assert!(!created),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (_dir, store) = temp_store().await;
        let task = store.save_task(&Task::new("Ephemeral")).await.unwrap();

        assert!(store.delete_task(&task.id).await.unwrap());
        assert!(store.get_task(&task.id).await.is_none());
        // Second delete is a no-op
        assert!(!store.delete_task(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_replicated_apply_is_idempotent() {
        let (_dir, store) = temp_store().await;

        let task = Task::new("Alpha");
        assert!(store.apply_replicated_task(&task).await.unwrap());
        assert!(store.apply_replicated_task(&task).await.unwrap());

        // Duplicate delivery leaves exactly one row
        assert_eq!(store.get_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replicated_apply_last_write_wins() {
        let (_dir, store) = temp_store().await;

        let mut older = Task::new("Old title");
        let mut newer = older.clone();
        newer.title = "New title".to_string();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        older.title = "Old title".to_string();

        // Newer first, older second: the stale revision must lose
        store.apply_replicated_task(&newer).await.unwrap();
        let applied = store.apply_replicated_task(&older).await.unwrap();
        assert!(!applied);
        assert_eq!(store.get_task(&older.id).await.unwrap().title, "New title");

        // Reverse order on a second task: the newer revision must win
        let mut first = Task::new("v1");
        let mut second = first.clone();
        second.title = "v2".to_string();
        second.updated_at = first.updated_at + chrono::Duration::seconds(5);
        first.title = "v1".to_string();

        store.apply_replicated_task(&first).await.unwrap();
        store.apply_replicated_task(&second).await.unwrap();
        assert_eq!(store.get_task(&first.id).await.unwrap().title, "v2");
    }

    #[tokio::test]
    async fn test_replicated_apply_emits_no_events() {
        let (_dir, store) = temp_store().await;
        let mut events = store.subscribe_changes();

        store.apply_replicated_task(&Task::new("Quiet")).await.unwrap();
        store.apply_replicated_delete("missing").await.unwrap();

        assert!(matches!(
            events.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_status_filter() {
        let (_dir, store) = temp_store().await;
        store.save_task(&Task::new("pending one")).await.unwrap();
        let synced = store.save_task(&Task::new("synced one")).await.unwrap();
        store.mark_task_synced(&synced.id).await.unwrap();

        let pending = store.get_tasks_by_status(SyncStatus::Pending).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "pending one");

        let synced_rows = store.get_tasks_by_status(SyncStatus::Synced).await;
        assert_eq!(synced_rows.len(), 1);
    }
}
