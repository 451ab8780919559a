//! Cross-process inode locks
//!
//! An inode is locked while a row for it exists in the `locks` table. The
//! check for an existing row and the insert happen in one `BEGIN IMMEDIATE`
//! transaction, so when two processes race for the same inode exactly one
//! of them inserts the row. The loser polls: there is no wake-up when a lock
//! is released, it simply tries again after the [`Backoff`] delay until its
//! retry budget is spent.
//!
//! The lock is advisory. It does not gate state transitions; it only
//! excludes other holders of the same inode's lock.

use std::time::Duration;

use mirrorfs_core::config::{BackoffStrategy, LockingConfig};
use mirrorfs_core::domain::InodeId;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::store::StateStore;
use crate::transaction::ImmediateTransaction;
use crate::StoreError;

/// Wait before the first retry when nothing else is configured
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between lock acquisition attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait before every retry
    Fixed { interval: Duration },
    /// `base * 2^retry`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Compute the delay before a given retry (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { interval } => interval,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed {
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// How hard [`InodeLock::acquire`] tries before giving up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockPolicy {
    /// Retries after the first attempt; `0` means try once and never sleep
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl LockPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total number of attempts, the first one included
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Policy described by the `locking` section of the configuration
    pub fn from_config(config: &LockingConfig) -> Self {
        let interval = Duration::from_millis(config.retry_interval_ms);
        let backoff = match config.backoff {
            BackoffStrategy::Fixed => Backoff::Fixed { interval },
            BackoffStrategy::Exponential => Backoff::Exponential {
                base: interval,
                max: Duration::from_millis(config.max_interval_ms),
            },
        };
        Self {
            max_retries: config.max_retries,
            backoff,
        }
    }
}

/// Exclusive lock on one inode, shared by every process using the database
///
/// Release it with [`InodeLock::release`]. A guard dropped without an
/// explicit release (early return, panic, cancelled task) hands the release
/// to a task on the current Tokio runtime. Either way the lock row is
/// deleted at most once per guard.
#[derive(Debug)]
#[must_use = "the inode is unlocked as soon as the guard is dropped"]
pub struct InodeLock {
    pool: SqlitePool,
    inode: InodeId,
    released: bool,
}

impl InodeLock {
    /// Locks `inode`, retrying according to `policy`
    ///
    /// Sleeping between attempts is the only place this crate blocks the
    /// calling task. With `max_retries == 0` a held lock fails at once.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InodeLocked` when every attempt found the inode
    /// locked, or a database error if an attempt could not run.
    pub async fn acquire(
        store: &StateStore,
        inode: InodeId,
        policy: LockPolicy,
    ) -> Result<Self, StoreError> {
        let pool = store.pool();
        let attempts = policy.attempts();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = policy.backoff.delay_for_retry(attempt - 1);
                tracing::debug!(
                    inode = %inode,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Inode is locked, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            if try_lock(pool, inode).await? {
                tracing::debug!(inode = %inode, "Locked inode");
                return Ok(Self {
                    pool: pool.clone(),
                    inode,
                    released: false,
                });
            }
        }

        tracing::debug!(inode = %inode, attempts, "Giving up on inode lock");
        Err(StoreError::InodeLocked { inode, attempts })
    }

    /// The locked inode
    pub fn inode(&self) -> InodeId {
        self.inode
    }

    /// Unlocks the inode
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockConsistencyViolation` if the lock row is
    /// already gone. That only happens when something released or deleted
    /// the lock behind this guard, and it must be treated as a bug.
    pub async fn release(mut self) -> Result<(), StoreError> {
        let result = release_lock(&self.pool, self.inode).await;
        self.released = true;
        result
    }
}

impl Drop for InodeLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let inode = self.inode;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(inode = %inode, "Lock guard dropped, releasing in background");
                let pool = self.pool.clone();
                handle.spawn(async move {
                    if let Err(e) = release_lock(&pool, inode).await {
                        tracing::error!(inode = %inode, error = %e, "Failed to release dropped inode lock");
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    inode = %inode,
                    "Inode lock dropped outside a Tokio runtime, lock row left behind"
                );
            }
        }
    }
}

/// One acquisition attempt: insert the lock row unless it already exists
async fn try_lock(pool: &SqlitePool, inode: InodeId) -> Result<bool, StoreError> {
    let mut tx = ImmediateTransaction::begin(pool).await?;
    let outcome = insert_if_unlocked(tx.conn(), inode).await;
    tx.finish(outcome).await
}

async fn insert_if_unlocked(
    conn: &mut SqliteConnection,
    inode: InodeId,
) -> Result<bool, StoreError> {
    if lock_exists(conn, inode).await? {
        return Ok(false);
    }
    sqlx::query("INSERT INTO locks (inode) VALUES (?)")
        .bind(inode.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

async fn release_lock(pool: &SqlitePool, inode: InodeId) -> Result<(), StoreError> {
    let mut tx = ImmediateTransaction::begin(pool).await?;
    let outcome = delete_existing(tx.conn(), inode).await;
    tx.finish(outcome).await?;
    tracing::debug!(inode = %inode, "Unlocked inode");
    Ok(())
}

async fn delete_existing(conn: &mut SqliteConnection, inode: InodeId) -> Result<(), StoreError> {
    if !lock_exists(conn, inode).await? {
        tracing::error!(
            inode = %inode,
            "Lock row missing at release: released twice or removed by another process"
        );
        return Err(StoreError::LockConsistencyViolation { inode });
    }
    sqlx::query("DELETE FROM locks WHERE inode = ?")
        .bind(inode.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn lock_exists(
    conn: &mut SqliteConnection,
    inode: InodeId,
) -> Result<bool, StoreError> {
    let row: Option<i64> = sqlx::query_scalar("SELECT inode FROM locks WHERE inode = ?")
        .bind(inode.to_db())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}
