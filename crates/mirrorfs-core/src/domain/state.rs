//! Inode states and the transition table
//!
//! ## State Machine
//!
//! ```text
//!  (ABSENT) ──mark-dirty──► DIRTY ──mark-clean──► CLEAN ──mark-remote──► REMOTE
//!                           ▲  │                   │  ▲                      │
//!                mark-dirty │  │ mark-todelete     │  └───mark-downloaded────┘
//!                           │  ▼                   │
//!                         TODELETE ◄─mark-todelete─┘
//!                              │
//!                              └──mark-deleted──► (ABSENT)
//! ```
//!
//! The diagram omits the self-loops (`mark-dirty` on DIRTY, `mark-todelete`
//! on TODELETE) and CLEAN ──mark-dirty──► DIRTY; the full table is
//! [`Transition::allowed_predecessors`].
//!
//! ABSENT is not a variant: an inode without a record is represented as
//! `Option::<InodeState>::None` everywhere in the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{DomainError, IllegalTransition};
use super::inode::InodeId;

/// Persisted state of a tracked inode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InodeState {
    /// Exists locally and remotely, synchronized
    #[serde(rename = "CLEAN")]
    Clean,
    /// Exists only remotely, not materialized locally
    #[serde(rename = "REMOTE")]
    Remote,
    /// Exists locally with modifications not yet uploaded
    #[serde(rename = "DIRTY")]
    Dirty,
    /// Scheduled for remote deletion
    #[serde(rename = "TODELETE")]
    ToDelete,
}

impl InodeState {
    /// Every persisted state, in label order of the `states` table CHECK constraint
    pub const ALL: [InodeState; 4] = [
        InodeState::Clean,
        InodeState::Remote,
        InodeState::Dirty,
        InodeState::ToDelete,
    ];

    /// Label stored in the `states.state` column
    pub fn as_str(&self) -> &'static str {
        match self {
            InodeState::Clean => "CLEAN",
            InodeState::Remote => "REMOTE",
            InodeState::Dirty => "DIRTY",
            InodeState::ToDelete => "TODELETE",
        }
    }

    /// Returns true if local content exists for the inode
    pub fn is_local(&self) -> bool {
        matches!(self, InodeState::Clean | InodeState::Dirty)
    }

    /// Returns true if the inode has work queued for a worker
    pub fn has_pending_work(&self) -> bool {
        matches!(self, InodeState::Dirty | InodeState::ToDelete)
    }
}

impl fmt::Display for InodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InodeState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLEAN" => Ok(InodeState::Clean),
            "REMOTE" => Ok(InodeState::Remote),
            "DIRTY" => Ok(InodeState::Dirty),
            "TODELETE" => Ok(InodeState::ToDelete),
            _ => Err(DomainError::UnknownState(s.to_string())),
        }
    }
}

/// Human label of a possibly absent state
pub fn display_state(state: &Option<InodeState>) -> &'static str {
    match state {
        Some(state) => state.as_str(),
        None => "ABSENT",
    }
}

/// A guarded change of an inode's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    /// Local copy evicted, content only remote
    MarkRemote,
    /// Remote content materialized locally
    MarkDownloaded,
    /// Local write happened
    MarkDirty,
    /// Local modifications uploaded
    MarkClean,
    /// Scheduled for remote deletion
    #[serde(rename = "mark-todelete")]
    MarkToDelete,
    /// Remote deletion done, record removed
    MarkDeleted,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::MarkRemote,
        Transition::MarkDownloaded,
        Transition::MarkDirty,
        Transition::MarkClean,
        Transition::MarkToDelete,
        Transition::MarkDeleted,
    ];

    /// States the inode may be in for this transition to be legal
    ///
    /// `None` in the slice stands for ABSENT.
    pub fn allowed_predecessors(self) -> &'static [Option<InodeState>] {
        use InodeState::{Clean, Dirty, Remote, ToDelete};

        match self {
            Transition::MarkRemote => &[Some(Clean)],
            Transition::MarkDownloaded => &[Some(Remote)],
            Transition::MarkDirty => &[Some(Clean), Some(Dirty), Some(ToDelete), None],
            Transition::MarkClean => &[Some(Dirty)],
            Transition::MarkToDelete => &[Some(Clean), Some(Dirty), Some(ToDelete)],
            Transition::MarkDeleted => &[Some(ToDelete)],
        }
    }

    /// State written on success; `None` removes the record
    pub fn target(self) -> Option<InodeState> {
        match self {
            Transition::MarkRemote => Some(InodeState::Remote),
            Transition::MarkDownloaded => Some(InodeState::Clean),
            Transition::MarkDirty => Some(InodeState::Dirty),
            Transition::MarkClean => Some(InodeState::Clean),
            Transition::MarkToDelete => Some(InodeState::ToDelete),
            Transition::MarkDeleted => None,
        }
    }

    /// Returns true if `current` is an allowed predecessor
    pub fn permits(self, current: Option<InodeState>) -> bool {
        self.allowed_predecessors().contains(&current)
    }

    /// Resolve the state an inode moves to from `current`
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] when `current` is not an allowed
    /// predecessor. An absent record is reported the same way, with
    /// `current: None`.
    pub fn apply(
        self,
        inode: InodeId,
        current: Option<InodeState>,
    ) -> Result<Option<InodeState>, IllegalTransition> {
        if self.permits(current) {
            Ok(self.target())
        } else {
            Err(IllegalTransition {
                inode,
                transition: self,
                current,
            })
        }
    }

    /// Allowed predecessors joined for messages, e.g. `CLEAN, DIRTY`
    pub fn predecessors_label(self) -> String {
        self.allowed_predecessors()
            .iter()
            .map(display_state)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::MarkRemote => "mark-remote",
            Transition::MarkDownloaded => "mark-downloaded",
            Transition::MarkDirty => "mark-dirty",
            Transition::MarkClean => "mark-clean",
            Transition::MarkToDelete => "mark-todelete",
            Transition::MarkDeleted => "mark-deleted",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = DomainError;

    /// Accepts `mark-dirty` as well as the short form `dirty`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("mark-").unwrap_or(&lower);
        match name {
            "remote" => Ok(Transition::MarkRemote),
            "downloaded" => Ok(Transition::MarkDownloaded),
            "dirty" => Ok(Transition::MarkDirty),
            "clean" => Ok(Transition::MarkClean),
            "todelete" => Ok(Transition::MarkToDelete),
            "deleted" => Ok(Transition::MarkDeleted),
            _ => Err(DomainError::UnknownTransition(s.to_string())),
        }
    }
}
