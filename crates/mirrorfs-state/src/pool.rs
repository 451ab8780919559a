//! Database connection management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode so readers in other processes are not blocked
//! - A busy timeout so contending writers wait instead of failing
//! - Idempotent schema setup on every open
//! - In-memory mode for testing

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;

use crate::StoreError;

/// Busy timeout used by [`DatabasePool::new`]
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the SQLite connection of one mirrorfs process
///
/// The pool is configured with:
/// - exactly one connection, so the operations of a process run one after
///   the other and each holds the connection for its whole transaction
/// - WAL journal mode
/// - a busy timeout (5 seconds by default) to handle write contention with
///   other processes
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens the database file with the default busy timeout
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection cannot be established,
    /// or `StoreError::MigrationFailed` if the schema cannot be created.
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Opens the database file, waiting up to `busy_timeout` for other writers
    ///
    /// This will:
    /// 1. Create parent directories if they don't exist
    /// 2. Create the database file if it doesn't exist
    /// 3. Enable WAL journal mode
    /// 4. Create the `states` and `locks` tables if missing
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection cannot be established,
    /// or `StoreError::MigrationFailed` if the schema cannot be created.
    pub async fn with_busy_timeout(
        db_path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(
            path = %db_path.display(),
            busy_timeout_ms = busy_timeout.as_millis() as u64,
            "State database opened"
        );

        Ok(Self { pool })
    }

    /// Creates a private in-memory database for testing
    ///
    /// SQLite in-memory databases live and die with their connection, so the
    /// single connection is never expired by the pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection cannot be established,
    /// or `StoreError::MigrationFailed` if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory state database initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection, waiting for an in-flight operation to finish
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("State database closed");
    }

    /// Creates the schema; safe to run from every process on every open
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        let migration_sql = include_str!("migrations/0001_initial.sql");
        pool.execute(migration_sql).await.map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to run initial migration: {}", e))
        })?;

        tracing::debug!("State database schema ready");
        Ok(())
    }
}
