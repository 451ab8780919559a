//! mirrorctl - Inspect and repair the mirrorfs state database
//!
//! Provides commands for:
//! - Summarizing inode states and held locks
//! - Showing one inode's state and lock
//! - Listing inodes in a given state
//! - Applying a single state transition by hand

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirrorfs_core::config::Config;
use mirrorfs_state::StateStore;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    list::ListCommand, locks::LocksCommand, mark::MarkCommand, show::ShowCommand,
    status::StatusCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "mirrorctl",
    version,
    about = "Inspect and repair the mirrorfs inode state database"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State database to open instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Count inodes per state and held locks
    Status(StatusCommand),
    /// Show the state and lock of one inode
    Show(ShowCommand),
    /// List the inodes in a state
    List(ListCommand),
    /// Apply one state transition to an inode
    Mark(MarkCommand),
    /// List locked inodes
    Locks(LocksCommand),
}

impl Cli {
    /// Configuration from `--config` (which must exist) or the default
    /// location, with `--db` applied on top
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(&Config::default_path()),
        };
        if let Some(db) = &self.db {
            config.store.path = db.clone();
        }
        Ok(config)
    }

    /// `RUST_LOG` wins, then `-v`, then the configured level
    fn log_filter(&self, config: &Config) -> EnvFilter {
        let level = match self.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = OutputFormat::from_flag(cli.json);

    match run(cli, format).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            format.formatter().error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, format: OutputFormat) -> Result<()> {
    let config = cli.load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter(&config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    for problem in config.validate() {
        tracing::warn!(field = %problem.field, "Invalid configuration: {}", problem.message);
    }

    let store = StateStore::from_config(&config)
        .await
        .with_context(|| format!("Failed to open {}", config.store.path.display()))?;

    let result = match &cli.command {
        Commands::Status(cmd) => cmd.execute(&store, format).await,
        Commands::Show(cmd) => cmd.execute(&store, format).await,
        Commands::List(cmd) => cmd.execute(&store, format).await,
        Commands::Mark(cmd) => cmd.execute(&store, format).await,
        Commands::Locks(cmd) => cmd.execute(&store, format).await,
    };

    store.close().await;
    result
}
