//! Write transactions that lock the database up front
//!
//! A plain `BEGIN` in SQLite is deferred: the transaction only asks for the
//! write lock at its first write, so two processes can both read "unlocked"
//! before either inserts. `BEGIN IMMEDIATE` takes the RESERVED lock at once,
//! which turns every read-check-write sequence into a critical section across
//! all processes sharing the file. A second `BEGIN IMMEDIATE` waits for the
//! first to finish, up to the connection's busy timeout.

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};

use crate::StoreError;

/// A `BEGIN IMMEDIATE` transaction on the pool's connection
///
/// Ends with [`commit`](Self::commit), [`rollback`](Self::rollback) or
/// [`finish`](Self::finish). If it is dropped before that (cancelled future,
/// panic, early `?`), the connection is detached from the pool and closed,
/// which makes SQLite roll the transaction back. The pool opens a fresh
/// connection for the next operation.
pub(crate) struct ImmediateTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTransaction {
    /// Takes the pool's connection and the database write lock
    ///
    /// The connection is owned by the transaction before `BEGIN IMMEDIATE`
    /// is sent, so cancelling this future while it waits for the lock still
    /// detaches the connection instead of returning it to the pool mid-begin.
    pub(crate) async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        let mut tx = Self {
            conn: Some(pool.acquire().await?),
        };
        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(tx.conn()).await {
            // No transaction was opened; the connection is clean
            drop(tx.conn.take());
            return Err(e.into());
        }
        Ok(tx)
    }

    /// The connection the transaction runs on
    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        self.conn
            .as_deref_mut()
            .expect("connection is held until the transaction ends")
    }

    /// The connection goes back to the pool only once `COMMIT` succeeded;
    /// a failure or a cancelled future leaves it to `Drop`.
    pub(crate) async fn commit(self) -> Result<(), StoreError> {
        self.end("COMMIT").await
    }

    pub(crate) async fn rollback(self) -> Result<(), StoreError> {
        self.end("ROLLBACK").await
    }

    async fn end(mut self, statement: &'static str) -> Result<(), StoreError> {
        sqlx::query(statement).execute(self.conn()).await?;
        drop(self.conn.take());
        Ok(())
    }

    /// Commits on `Ok`, rolls back on `Err`, and passes `outcome` through
    ///
    /// A failed rollback is logged; the original error is what the caller sees.
    pub(crate) async fn finish<T>(
        self,
        outcome: Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Transaction dropped before it ended, closing its connection");
            drop(conn.detach());
        }
    }
}
