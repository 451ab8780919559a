//! The state store facade
//!
//! [`StateStore`] is the only object the rest of mirrorfs instantiates. One
//! instance per process owns that process's connection to the shared
//! database and exposes:
//!
//! - the six guarded transitions (`mark_*`), each one transaction
//! - snapshot queries over the `states` table
//! - construction of [`InodeLock`] guards bound to the same database
//!
//! ## Type Mapping
//!
//! | Domain Type  | SQL Type | Strategy |
//! |--------------|----------|----------|
//! | InodeId      | INTEGER  | `u64` bit pattern as `i64` via `to_db()` / `from_db()` |
//! | InodeState   | TEXT     | `CLEAN`, `REMOTE`, `DIRTY`, `TODELETE` via `as_str()` / `FromStr` |
//! | ABSENT       | -        | no row |

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;

use mirrorfs_core::config::Config;
use mirrorfs_core::domain::{display_state, DomainError, InodeId, InodeState, Transition};
use futures_util::FutureExt;
use mirrorfs_core::ports::IInodeStateStore;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::lock::{InodeLock, LockPolicy};
use crate::pool::DatabasePool;
use crate::transaction::ImmediateTransaction;
use crate::StoreError;

/// Persisted inode state machine plus inode locks
///
/// Every method is self-contained: it acquires the process's single
/// connection, runs one transaction and gives the connection back. Calls
/// from several tasks of one process therefore run one after the other,
/// and the `BEGIN IMMEDIATE` transactions serialize them against other
/// processes. The store can be shared behind an `Arc`.
pub struct StateStore {
    db: DatabasePool,
    lock_policy: LockPolicy,
}

impl StateStore {
    /// Wraps an open database; locks default to a single attempt
    pub fn new(db: DatabasePool) -> Self {
        Self::with_policy(db, LockPolicy::default())
    }

    /// Wraps an open database with the backoff used by [`StateStore::lock`]
    pub fn with_policy(db: DatabasePool, lock_policy: LockPolicy) -> Self {
        Self { db, lock_policy }
    }

    /// Opens (and if needed creates) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(DatabasePool::new(path).await?))
    }

    /// Opens the database and lock policy described by `config`
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let db = DatabasePool::with_busy_timeout(
            &config.store.path,
            Duration::from_secs(config.store.busy_timeout_secs),
        )
        .await?;
        Ok(Self::with_policy(
            db,
            LockPolicy::from_config(&config.locking),
        ))
    }

    /// Private in-memory store for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(DatabasePool::in_memory().await?))
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Policy [`StateStore::lock`] starts from
    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    /// Closes the connection
    ///
    /// Held [`InodeLock`]s can no longer be released afterwards; release
    /// them first.
    pub async fn close(self) {
        self.db.close().await;
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// CLEAN → REMOTE
    pub async fn mark_remote(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkRemote).await
    }

    /// REMOTE → CLEAN
    pub async fn mark_downloaded(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkDownloaded).await
    }

    /// CLEAN, DIRTY, TODELETE or ABSENT → DIRTY
    pub async fn mark_dirty(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkDirty).await
    }

    /// DIRTY → CLEAN
    pub async fn mark_clean(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkClean).await
    }

    /// CLEAN, DIRTY or TODELETE → TODELETE
    pub async fn mark_todelete(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkToDelete).await
    }

    /// TODELETE → ABSENT (the record is removed)
    pub async fn mark_deleted(&self, inode: InodeId) -> Result<(), StoreError> {
        self.transition(inode, Transition::MarkDeleted).await
    }

    /// Applies `transition` to `inode` in one transaction
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalTransition` if the current state (ABSENT
    /// included) is not an allowed predecessor; nothing is written then.
    pub async fn transition(
        &self,
        inode: InodeId,
        transition: Transition,
    ) -> Result<(), StoreError> {
        let mut tx = ImmediateTransaction::begin(self.pool()).await?;
        let outcome = apply_in(tx.conn(), inode, transition).await;
        let (from, to) = tx.finish(outcome).await?;

        tracing::debug!(
            inode = %inode,
            transition = %transition,
            from = display_state(&from),
            to = display_state(&to),
            "Inode state changed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current state of `inode`, `None` when it has no record
    pub async fn state_of(&self, inode: InodeId) -> Result<Option<InodeState>, StoreError> {
        let mut conn = self.pool().acquire().await?;
        read_state(&mut conn, inode).await
    }

    /// Snapshot of the inodes currently in `state`
    ///
    /// The ids are read in one query when this is called; changes made
    /// afterwards, by this or any other process, are not reflected. No
    /// ordering is guaranteed.
    pub async fn inodes_in_state(&self, state: InodeState) -> Result<InodeSnapshot, StoreError> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT inode FROM states WHERE state = ?")
            .bind(state.as_str())
            .fetch_all(self.pool())
            .await?;
        Ok(InodeSnapshot::new(
            rows.into_iter().map(InodeId::from_db).collect(),
        ))
    }

    /// Snapshot of the inodes waiting for upload
    pub async fn dirty_inodes(&self) -> Result<InodeSnapshot, StoreError> {
        self.inodes_in_state(InodeState::Dirty).await
    }

    /// Snapshot of the inodes waiting for remote deletion
    pub async fn todelete_inodes(&self) -> Result<InodeSnapshot, StoreError> {
        self.inodes_in_state(InodeState::ToDelete).await
    }

    /// Number of inodes per state; every state is present, possibly as 0
    pub async fn count_by_state(&self) -> Result<BTreeMap<InodeState, u64>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM states GROUP BY state")
                .fetch_all(self.pool())
                .await?;

        let mut counts: BTreeMap<InodeState, u64> =
            InodeState::ALL.iter().map(|state| (*state, 0)).collect();
        for (label, count) in rows {
            counts.insert(parse_state(&label)?, count as u64);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Locks `inode` with this store's backoff and `max_retries` retries
    pub async fn lock(&self, inode: InodeId, max_retries: u32) -> Result<InodeLock, StoreError> {
        InodeLock::acquire(self, inode, self.lock_policy.with_max_retries(max_retries)).await
    }

    /// Locks `inode` with an explicit policy
    pub async fn lock_with(
        &self,
        inode: InodeId,
        policy: LockPolicy,
    ) -> Result<InodeLock, StoreError> {
        InodeLock::acquire(self, inode, policy).await
    }

    /// Runs `f` while holding the lock on `inode`
    ///
    /// The lock is released after `f` completes, whether it returned `Ok`
    /// or `Err` or panicked. If releasing fails, that error is returned in
    /// place of `f`'s result; a panic is resumed once the lock is released.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        inode: InodeId,
        max_retries: u32,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + std::fmt::Display,
    {
        self.with_lock_policy(inode, self.lock_policy.with_max_retries(max_retries), f)
            .await
    }

    /// [`StateStore::with_lock`] with an explicit policy
    pub async fn with_lock_policy<F, Fut, T, E>(
        &self,
        inode: InodeId,
        policy: LockPolicy,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + std::fmt::Display,
    {
        let lock = InodeLock::acquire(self, inode, policy).await?;
        let outcome = AssertUnwindSafe(async { f().await }).catch_unwind().await;
        let released = lock.release().await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                if let Err(e) = released {
                    tracing::error!(
                        inode = %inode,
                        error = %e,
                        "Locked section panicked and the lock could not be released"
                    );
                }
                std::panic::resume_unwind(panic);
            }
        };

        match (result, released) {
            (result, Ok(())) => result,
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Err(err), Err(release_err)) => {
                tracing::error!(
                    inode = %inode,
                    error = %err,
                    "Locked section failed and the lock could not be released"
                );
                Err(release_err.into())
            }
        }
    }

    /// Returns true if some process holds the lock on `inode`
    pub async fn is_locked(&self, inode: InodeId) -> Result<bool, StoreError> {
        let mut conn = self.pool().acquire().await?;
        crate::lock::lock_exists(&mut conn, inode).await
    }

    /// Snapshot of every locked inode
    pub async fn locked_inodes(&self) -> Result<InodeSnapshot, StoreError> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT inode FROM locks")
            .fetch_all(self.pool())
            .await?;
        Ok(InodeSnapshot::new(
            rows.into_iter().map(InodeId::from_db).collect(),
        ))
    }
}

// ============================================================================
// Snapshot iterator
// ============================================================================

/// Inode ids read in a single query
///
/// Finite and consumed once. It holds no connection, so the store stays
/// usable while iterating, e.g. to lock and transition each id.
///
/// A snapshot cannot be duplicated to replay it; query again instead:
///
/// ```compile_fail
/// fn replayable<T: Clone>() {}
/// replayable::<mirrorfs_state::InodeSnapshot>();
/// ```
#[derive(Debug)]
pub struct InodeSnapshot {
    inodes: std::vec::IntoIter<InodeId>,
}

impl InodeSnapshot {
    fn new(inodes: Vec<InodeId>) -> Self {
        Self {
            inodes: inodes.into_iter(),
        }
    }
}

impl Iterator for InodeSnapshot {
    type Item = InodeId;

    fn next(&mut self) -> Option<Self::Item> {
        self.inodes.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inodes.size_hint()
    }
}

impl ExactSizeIterator for InodeSnapshot {}

// ============================================================================
// SQL helpers
// ============================================================================

/// Reads the current state, checks the transition and writes the result
///
/// Returns the state before and after.
async fn apply_in(
    conn: &mut SqliteConnection,
    inode: InodeId,
    transition: Transition,
) -> Result<(Option<InodeState>, Option<InodeState>), StoreError> {
    let current = read_state(conn, inode).await?;
    let next = transition.apply(inode, current)?;

    match next {
        Some(state) => {
            sqlx::query(
                "INSERT INTO states (inode, state) VALUES (?, ?)
                 ON CONFLICT(inode) DO UPDATE SET state = excluded.state",
            )
            .bind(inode.to_db())
            .bind(state.as_str())
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM states WHERE inode = ?")
                .bind(inode.to_db())
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok((current, next))
}

async fn read_state(
    conn: &mut SqliteConnection,
    inode: InodeId,
) -> Result<Option<InodeState>, StoreError> {
    let label: Option<String> = sqlx::query_scalar("SELECT state FROM states WHERE inode = ?")
        .bind(inode.to_db())
        .fetch_optional(&mut *conn)
        .await?;
    label.as_deref().map(parse_state).transpose()
}

fn parse_state(label: &str) -> Result<InodeState, StoreError> {
    label
        .parse()
        .map_err(|e: DomainError| StoreError::SerializationError(e.to_string()))
}

// ============================================================================
// IInodeStateStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IInodeStateStore for StateStore {
    async fn apply_transition(
        &self,
        inode: InodeId,
        transition: Transition,
    ) -> anyhow::Result<()> {
        Ok(self.transition(inode, transition).await?)
    }

    async fn get_state(&self, inode: InodeId) -> anyhow::Result<Option<InodeState>> {
        Ok(self.state_of(inode).await?)
    }

    async fn list_inodes(&self, state: InodeState) -> anyhow::Result<Vec<InodeId>> {
        Ok(self.inodes_in_state(state).await?.collect())
    }

    async fn count_inodes_by_state(&self) -> anyhow::Result<BTreeMap<InodeState, u64>> {
        Ok(self.count_by_state().await?)
    }
}
