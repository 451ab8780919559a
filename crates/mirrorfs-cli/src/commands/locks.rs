//! Locks command - Print the inodes whose lock is held
//!
//! A lock left behind by a crashed process shows up here and stays until it
//! is removed from the database by hand.

use anyhow::{Context, Result};
use clap::Args;
use mirrorfs_core::domain::InodeId;
use mirrorfs_state::StateStore;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct LocksCommand {}

impl LocksCommand {
    pub async fn execute(&self, store: &StateStore, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();

        let mut inodes: Vec<InodeId> = store
            .locked_inodes()
            .await
            .context("Failed to read locks")?
            .collect();
        inodes.sort();

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({ "locked_inodes": inodes }));
            return Ok(());
        }

        if inodes.is_empty() {
            formatter.success("No inode is locked");
            return Ok(());
        }
        formatter.success(&format!("{} locked inode(s)", inodes.len()));
        for inode in &inodes {
            formatter.info(&inode.to_string());
        }
        Ok(())
    }
}
