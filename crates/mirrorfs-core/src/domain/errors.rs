//! Domain error types
//!
//! [`IllegalTransition`] is raised by the state machine whenever the current
//! state of an inode is not an allowed predecessor of the requested
//! transition, including the case where the inode has no record at all.
//! [`DomainError`] covers parsing of identifiers, states and transitions.

use thiserror::Error;

use super::inode::InodeId;
use super::state::{display_state, InodeState, Transition};

/// A transition was requested from a state that does not permit it
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error(
    "Illegal transition {transition} on inode {inode}: current state {} is not one of [{}]",
    display_state(.current),
    .transition.predecessors_label()
)]
pub struct IllegalTransition {
    /// The inode the transition was requested for
    pub inode: InodeId,
    /// The rejected transition
    pub transition: Transition,
    /// State found in the store; `None` means the inode has no record
    pub current: Option<InodeState>,
}

/// Errors that can occur while parsing domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A state label that is not one of CLEAN, REMOTE, DIRTY, TODELETE
    #[error("Unknown inode state: {0}")]
    UnknownState(String),

    /// A transition name that does not exist
    #[error("Unknown transition: {0}")]
    UnknownTransition(String),

    /// An inode number that cannot be parsed
    #[error("Invalid inode number: {0}")]
    InvalidInode(String),
}
