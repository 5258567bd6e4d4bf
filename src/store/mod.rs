//! # Durable Local Store
//!
//! Transactional, schema-versioned SQLite storage for the offline-first
//! core. Holds four collections: tasks, the pending-operation queue, the
//! settings keyspace and the notification log.
//!
//! ## Architecture
//!
//! - **Local State**: tasks with completion/priority/due-date/sync-status
//!   lookups
//! - **Offline Queue**: operations waiting for remote reconciliation
//! - **Settings**: key/value pairs, also hosting instance heartbeat keys
//! - **Notification Log**: the audit trail for terminal sync failures
//!
//! ## Key Components
//!
//! - `LocalStore`: connection pool, schema management, change-event bus
//! - `schema.sql`: table and index definitions, idempotent
//! - `tasks.rs`: task CRUD and the replicated last-write-wins apply path
//! - `queue.rs`: pending-operation queue operations
//! - `settings.rs`: settings keyspace, heartbeats and the notification log
//!
//! ## Failure Policy
//!
//! Reads degrade to empty results so UI code keeps working when the store
//! is unhealthy; writes surface [`SyncError::StoreUnavailable`] so callers
//! can keep the operation queued instead of assuming success.
//!
//! ## Change Events
//!
//! Every successful *local* task write publishes a [`StoreEvent`] on an
//! internal broadcast bus. The real-time façade subscribes and relays the
//! change to sibling instances. Replicated applies deliberately bypass the
//! bus so an inbound change is never re-broadcast.

pub mod queue;
pub mod settings;
pub mod tasks;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::model::Task;

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// A change applied to the store by local code
///
/// Replicated applies (changes received from sibling instances) do not
/// produce events; that is what prevents broadcast loops.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A task was inserted or updated locally
    TaskSaved {
        task: Task,
        /// True when the write created the row, false when it updated it
        created: bool,
    },
    /// A task was deleted locally
    TaskDeleted { task_id: String },
}

/// Local store connection manager
///
/// Manages the SQLite connection pool and provides the collection
/// operations implemented across the sibling modules.
#[derive(Debug)]
pub struct LocalStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalStore {
    /// Open or create the store at `path`
    ///
    /// Creates the database file and parent directory if missing and runs
    /// the idempotent schema setup. Opening the same path twice yields two
    /// independent handles onto the same data; the schema setup is safe to
    /// repeat.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::store(format!("cannot create data dir: {}", e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        // WAL mode and pragmas for a single-writer local database
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;
        sqlx::query("PRAGMA temp_store=MEMORY").execute(&pool).await?;

        let (events, _) = broadcast::channel(256);
        let store = Self { pool, events };
        store.init_schema().await?;

        tracing::info!("[Store] Opened local store at {}", path.display());
        Ok(store)
    }

    /// Initialize database schema
    ///
    /// Creates all tables and indexes (idempotent) and applies pending
    /// migrations.
    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;
        self.run_migrations().await?;
        Ok(())
    }

    /// Apply schema migrations past the recorded version
    async fn run_migrations(&self) -> Result<(), SyncError> {
        let (current,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .unwrap_or((0,));

        if current < 1 {
            // OR IGNORE: a sibling instance opening the same file may have
            // recorded the version between our read and this write
            sqlx::query(
                "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (1, ?)",
            )
            .bind(crate::model::now_ts())
            .execute(&self.pool)
            .await?;
            tracing::info!("[Store] Applied schema migration 1");
        }

        Ok(())
    }

    /// Connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Subscribe to local change events
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Publish a change event to in-process observers
    pub(crate) fn emit(&self, event: StoreEvent) {
        match self.events.send(event) {
            Ok(n) => tracing::debug!("[Store] Change event delivered to {} observers", n),
            Err(_) => tracing::trace!("[Store] No observers for change event"),
        }
    }

    /// Counts per collection, for diagnostics and the UI status panel
    pub async fn stats(&self) -> Result<StoreStats, SyncError> {
        let (task_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        let (pending_operations,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_queue WHERE failed = 0")
                .fetch_one(&self.pool)
                .await?;
        let (abandoned_operations,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_queue WHERE failed = 1")
                .fetch_one(&self.pool)
                .await?;
        let (unread_notifications,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE is_read = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            task_count: task_count as u64,
            pending_operations: pending_operations as u64,
            abandoned_operations: abandoned_operations as u64,
            unread_notifications: unread_notifications as u64,
        })
    }

    /// Remove every row from every collection
    ///
    /// Kept for explicit user-initiated resets; never called by the core
    /// itself.
    pub async fn clear_all_data(&self) -> Result<(), SyncError> {
        for table in ["tasks", "sync_queue", "settings", "notifications"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await?;
        }
        tracing::warn!("[Store] All local data cleared");
        Ok(())
    }
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Total number of tasks stored locally
    pub task_count: u64,
    /// Queue entries still eligible for reconciliation
    pub pending_operations: u64,
    /// Queue entries abandoned after exhausting their retries
    pub abandoned_operations: u64,
    /// Notification-log entries not yet read
    pub unread_notifications: u64,
}
