//! Domain types for the inode state layer
//!
//! - Inode identifiers
//! - Inode states and the transition table between them
//! - Domain-specific error types

pub mod errors;
pub mod inode;
pub mod state;

// Re-export commonly used types
pub use errors::{DomainError, IllegalTransition};
pub use inode::InodeId;
pub use state::{display_state, InodeState, Transition};
