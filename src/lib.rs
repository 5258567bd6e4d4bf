//! TaskMesh - Offline-First Task Synchronization Core
//!
//! TaskMesh keeps a task list usable with zero connectivity and converges
//! it across any number of concurrently running application instances. The
//! local SQLite store is the source of truth for reads and writes; a
//! background sync manager reconciles with a remote HTTP API when
//! reachable, and a redundant multi-channel transport replicates changes
//! between live instances in real time.
//!
//! # Overview
//!
//! - Local-first persistence: every mutation lands in SQLite immediately,
//!   with a pending-operation queue recording what still needs to reach
//!   the remote service
//! - Background reconciliation: periodic, connectivity-triggered and
//!   fire-and-forget sync cycles with bounded retries per operation
//! - Peer broadcast: best-effort delivery over in-process, spool-directory
//!   and TCP-relay channels with central deduplication
//! - Liveness: heartbeat-based instance counting with lazy reaping, plus a
//!   ping/pong fallback probe
//!
//! # Module Structure
//!
//! - **`store`** - the durable local store (tasks, queue, settings,
//!   notification log)
//! - **`transport`** - the redundant peer broadcast transport and its
//!   channels
//! - **`registry`** - instance identity and liveness tracking
//! - **`sync`** - the synchronization manager
//! - **`realtime`** - the messaging façade application code talks to
//! - **`remote`** - the HTTP client for the reconciliation API
//! - **`connectivity`** - online/offline tracking and probing
//! - **`core`** - the composition root wiring it all together
//!
//! # Usage
//!
//! ```rust,no_run
//! use taskmesh::config::SyncConfig;
//! use taskmesh::core::SyncCore;
//! use taskmesh::model::Task;
//!
//! # async fn example() -> Result<(), taskmesh::error::SyncError> {
//! let config = SyncConfig::builder()
//!     .api_base_url("http://localhost:3000/api")
//!     .build()?;
//! let core = SyncCore::start(config).await?;
//!
//! // Local-first write; replication and remote sync happen in the
//! // background
//! core.sync().save_task(&Task::new("Water the plants")).await?;
//!
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectivity;
pub mod core;
pub mod error;
pub mod model;
pub mod realtime;
pub mod registry;
pub mod remote;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::SyncConfig;
pub use core::SyncCore;
pub use error::SyncError;
pub use model::{SyncMessage, Task};
