//! List command - Print the inodes in one state

use anyhow::{Context, Result};
use clap::Args;
use mirrorfs_core::domain::InodeState;
use mirrorfs_core::ports::IInodeStateStore;
use mirrorfs_state::StateStore;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct ListCommand {
    /// State to list: clean, remote, dirty or todelete
    pub state: InodeState,
}

impl ListCommand {
    pub async fn execute(&self, store: &StateStore, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let port: &dyn IInodeStateStore = store;

        let mut inodes = port
            .list_inodes(self.state)
            .await
            .with_context(|| format!("Failed to list {} inodes", self.state))?;
        inodes.sort();

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "state": self.state,
                "inodes": inodes,
            }));
            return Ok(());
        }

        formatter.success(&format!("{} inode(s) in {}", inodes.len(), self.state));
        for inode in &inodes {
            formatter.info(&inode.to_string());
        }
        Ok(())
    }
}
