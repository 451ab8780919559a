//! mirrorctl subcommands
//!
//! Every command receives the opened [`StateStore`](mirrorfs_state::StateStore)
//! and the selected output format, and returns an error for anything that
//! should make the process exit non-zero.

pub mod list;
pub mod locks;
pub mod mark;
pub mod show;
pub mod status;
