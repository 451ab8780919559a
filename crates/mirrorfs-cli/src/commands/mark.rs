//! Mark command - Apply one state transition by hand
//!
//! Provides the `mirrorctl mark <transition> <inode>` CLI command. The
//! transition goes through the same guarded path the sync processes use, so
//! a transition the inode's current state does not permit is refused and the
//! command fails. The inode's lock is not taken.

use anyhow::{Context, Result};
use clap::Args;
use mirrorfs_core::domain::{display_state, InodeId, Transition};
use mirrorfs_core::ports::IInodeStateStore;
use mirrorfs_state::StateStore;
use tracing::info;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct MarkCommand {
    /// Transition to apply: remote, downloaded, dirty, clean, todelete or deleted
    pub transition: Transition,
    /// Inode number
    pub inode: InodeId,
}

impl MarkCommand {
    pub async fn execute(&self, store: &StateStore, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let port: &dyn IInodeStateStore = store;

        if store.is_locked(self.inode).await? {
            tracing::warn!(inode = %self.inode, "Inode is locked by another process");
        }

        port.apply_transition(self.inode, self.transition)
            .await
            .with_context(|| format!("Cannot {} inode {}", self.transition, self.inode))?;
        let state = port.get_state(self.inode).await?;

        info!(inode = %self.inode, transition = %self.transition, "Transition applied by hand");

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "inode": self.inode,
                "transition": self.transition,
                "state": display_state(&state),
            }));
            return Ok(());
        }

        formatter.success(&format!(
            "Inode {} is now {}",
            self.inode,
            display_state(&state)
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorfs_core::domain::InodeState;
    use mirrorfs_state::StoreError;

    fn mark(transition: Transition, inode: u64) -> MarkCommand {
        MarkCommand {
            transition,
            inode: InodeId::new(inode),
        }
    }

    #[tokio::test]
    async fn test_mark_applies_transition() {
        let store = StateStore::in_memory().await.unwrap();

        mark(Transition::MarkDirty, 3)
            .execute(&store, OutputFormat::Human)
            .await
            .unwrap();
        mark(Transition::MarkClean, 3)
            .execute(&store, OutputFormat::Json)
            .await
            .unwrap();

        assert_eq!(
            store.state_of(InodeId::new(3)).await.unwrap(),
            Some(InodeState::Clean)
        );
    }

    #[tokio::test]
    async fn test_illegal_mark_fails() {
        let store = StateStore::in_memory().await.unwrap();

        let err = mark(Transition::MarkRemote, 3)
            .execute(&store, OutputFormat::Human)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::IllegalTransition(_))
        ));
        assert!(format!("{:#}", err).contains("ABSENT"));
        assert_eq!(store.state_of(InodeId::new(3)).await.unwrap(), None);
    }
}
