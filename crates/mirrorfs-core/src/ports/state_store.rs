//! Inode state store port (driven/secondary port)
//!
//! This module defines the interface for persisting inode states and
//! querying them.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//!   Callers that need to react to an illegal transition downcast the error
//!   to the adapter's error type or to [`IllegalTransition`].
//! - Inode locks are not part of the port. A lock is bound to the backing
//!   file of a concrete store, so lock guards are constructed from the
//!   adapter directly.
//! - Nothing behind this trait checks lock ownership. Callers running a
//!   multi-step sequence on one inode (list dirty, upload, mark clean) must
//!   hold that inode's lock for the whole sequence.
//!
//! [`IllegalTransition`]: crate::domain::IllegalTransition

use std::collections::BTreeMap;

use crate::domain::{InodeId, InodeState, Transition};

/// Port trait for the persisted inode state machine
///
/// ## Implementation Notes
///
/// - Each call must be atomic: the read of the current state and the write
///   of the next one happen in one transaction.
/// - A rejected transition leaves the stored state untouched.
/// - `list_inodes` returns a snapshot taken at call time, in no particular
///   order.
/// - The per-transition methods and the dirty/todelete listings are
///   provided on top of `apply_transition` and `list_inodes`.
#[async_trait::async_trait]
pub trait IInodeStateStore: Send + Sync {
    /// Applies `transition` to `inode` if its current state allows it
    async fn apply_transition(&self, inode: InodeId, transition: Transition)
        -> anyhow::Result<()>;

    /// Returns the current state, `None` when the inode has no record
    async fn get_state(&self, inode: InodeId) -> anyhow::Result<Option<InodeState>>;

    /// Returns every inode currently in `state`
    async fn list_inodes(&self, state: InodeState) -> anyhow::Result<Vec<InodeId>>;

    /// Counts inodes per state; every state is present in the map
    async fn count_inodes_by_state(&self) -> anyhow::Result<BTreeMap<InodeState, u64>>;

    /// CLEAN -> REMOTE, after the local copy was evicted
    async fn mark_remote(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkRemote).await
    }

    /// REMOTE -> CLEAN, after the content was fetched
    async fn mark_downloaded(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkDownloaded).await
    }

    /// ABSENT, CLEAN, DIRTY or TODELETE -> DIRTY, on local modification
    async fn mark_dirty(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkDirty).await
    }

    /// DIRTY -> CLEAN, after the upload finished
    async fn mark_clean(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkClean).await
    }

    /// CLEAN, DIRTY or TODELETE -> TODELETE, on local deletion
    async fn mark_todelete(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkToDelete).await
    }

    /// TODELETE -> ABSENT, after the remote copy was deleted
    async fn mark_deleted(&self, inode: InodeId) -> anyhow::Result<()> {
        self.apply_transition(inode, Transition::MarkDeleted).await
    }

    /// Inodes waiting for upload
    async fn dirty_inodes(&self) -> anyhow::Result<Vec<InodeId>> {
        self.list_inodes(InodeState::Dirty).await
    }

    /// Inodes waiting for remote deletion
    async fn todelete_inodes(&self) -> anyhow::Result<Vec<InodeId>> {
        self.list_inodes(InodeState::ToDelete).await
    }
}
