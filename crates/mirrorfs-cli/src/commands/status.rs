//! Status command - Summarize the state database
//!
//! Provides the `mirrorctl status` CLI command which:
//! 1. Counts tracked inodes per state, empty states included
//! 2. Counts inodes whose lock is currently held

use anyhow::{Context, Result};
use clap::Args;
use mirrorfs_core::domain::InodeState;
use mirrorfs_core::ports::IInodeStateStore;
use mirrorfs_state::StateStore;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, store: &StateStore, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let port: &dyn IInodeStateStore = store;

        let counts = port
            .count_inodes_by_state()
            .await
            .context("Failed to count inodes by state")?;
        let locked = store
            .locked_inodes()
            .await
            .context("Failed to read locks")?
            .len();
        let total: u64 = counts.values().sum();

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "total_inodes": total,
                "inodes_by_state": counts,
                "locked_inodes": locked,
            }));
            return Ok(());
        }

        formatter.success(&format!("{} tracked inode(s)", total));
        for state in InodeState::ALL {
            let count = counts.get(&state).copied().unwrap_or(0);
            formatter.field(state.as_str(), &count.to_string());
        }
        formatter.field("LOCKED", &locked.to_string());

        let pending = counts
            .iter()
            .filter(|(state, _)| state.has_pending_work())
            .map(|(_, count)| count)
            .sum::<u64>();
        if pending > 0 {
            formatter.info("");
            formatter.info(&format!("{} inode(s) waiting for upload or deletion", pending));
        }
        Ok(())
    }
}
