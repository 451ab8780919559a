//! mirrorfs State - Persisted inode state machine and inode locks
//!
//! SQLite-based storage for:
//! - The state of every tracked inode (`states` table)
//! - Cross-process advisory inode locks (`locks` table)
//!
//! ## Architecture
//!
//! This crate implements the `IInodeStateStore` port from `mirrorfs-core`
//! using SQLite as the storage backend. Every process of the sync agent
//! (filesystem layer, upload and download workers) opens the same database
//! file. All cross-process coordination goes through SQLite write
//! transactions opened with `BEGIN IMMEDIATE`, which take the database's
//! RESERVED lock before reading, so a read-check-write sequence of one
//! process can never interleave with another's.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Single-connection pool with schema setup
//! - [`StateStore`] - Facade for transitions, queries and locks
//! - [`InodeLock`] - Scoped inode lock with bounded retry
//! - [`StoreError`] - Error types for store operations
//!
//! ## Lock discipline
//!
//! Transitions never check who holds an inode's lock. Callers running a
//! multi-step sequence on an inode must wrap it in an [`InodeLock`] (or
//! [`StateStore::with_lock`]) in every process, or the locks protect nothing.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use mirrorfs_core::domain::InodeId;
//! use mirrorfs_state::{StateStore, StoreError};
//!
//! # async fn example() -> Result<(), StoreError> {
//! let store = StateStore::open(Path::new("/var/lib/mirrorfs/state.db")).await?;
//!
//! for inode in store.dirty_inodes().await? {
//!     store
//!         .with_lock(inode, 3, || async {
//!             // upload the file content here
//!             store.mark_clean(inode).await
//!         })
//!         .await?;
//! }
//!
//! store.close().await;
//! # Ok(())
//! # }
//! ```

pub mod lock;
pub mod pool;
pub mod store;
mod transaction;

pub use lock::{Backoff, InodeLock, LockPolicy};
pub use pool::DatabasePool;
pub use store::{InodeSnapshot, StateStore};

use mirrorfs_core::domain::{IllegalTransition, InodeId};

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The inode's current state does not permit the requested transition.
    /// An inode without a record is reported here too.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// Every acquisition attempt found the inode already locked
    #[error("Inode {inode} is locked (gave up after {attempts} attempt(s))")]
    InodeLocked {
        /// The inode that could not be locked
        inode: InodeId,
        /// Number of attempts made, retries included
        attempts: u32,
    },

    /// The lock row disappeared while the guard was held
    ///
    /// Means the lock was released twice or deleted behind the holder's
    /// back. This is a programming error and must not be retried.
    #[error("Lock on inode {inode} vanished before it was released")]
    LockConsistencyViolation {
        /// The inode whose lock row was missing
        inode: InodeId,
    },

    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped back to a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StoreError {
    /// Returns true for errors a caller may retry later as a whole
    ///
    /// Only [`StoreError::InodeLocked`] qualifies; skipping the inode for
    /// the current cycle is the usual reaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::InodeLocked { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}
