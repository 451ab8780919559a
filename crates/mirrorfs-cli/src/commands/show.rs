//! Show command - Display one inode's state and lock

use anyhow::{Context, Result};
use clap::Args;
use mirrorfs_core::domain::{display_state, InodeId, Transition};
use mirrorfs_state::StateStore;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Inode number
    pub inode: InodeId,
}

impl ShowCommand {
    pub async fn execute(&self, store: &StateStore, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();

        let state = store
            .state_of(self.inode)
            .await
            .with_context(|| format!("Failed to read state of inode {}", self.inode))?;
        let locked = store
            .is_locked(self.inode)
            .await
            .with_context(|| format!("Failed to read lock of inode {}", self.inode))?;
        let allowed: Vec<&str> = Transition::ALL
            .iter()
            .filter(|t| t.permits(state))
            .map(|t| t.as_str())
            .collect();

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "inode": self.inode,
                "state": display_state(&state),
                "locked": locked,
                "allowed_transitions": allowed,
            }));
            return Ok(());
        }

        formatter.success(&format!("Inode {}", self.inode));
        formatter.field("State", display_state(&state));
        formatter.field("Locked", if locked { "yes" } else { "no" });
        formatter.field(
            "Allowed",
            &if allowed.is_empty() {
                "-".to_string()
            } else {
                allowed.join(", ")
            },
        );
        Ok(())
    }
}
