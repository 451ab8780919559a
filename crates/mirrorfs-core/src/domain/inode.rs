//! Inode identifier newtype

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Inode number of a tracked file object
///
/// Stable for the whole lifetime of the object. SQLite has no unsigned
/// integer type, so the value is persisted as the `i64` with the same bit
/// pattern; [`InodeId::to_db`] and [`InodeId::from_db`] are exact inverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeId(u64);

impl InodeId {
    #[must_use]
    pub const fn new(inode: u64) -> Self {
        Self(inode)
    }

    /// Get the raw inode number
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Value stored in the `inode` column
    #[must_use]
    pub const fn to_db(&self) -> i64 {
        self.0 as i64
    }

    /// Rebuild an id from the `inode` column
    #[must_use]
    pub const fn from_db(raw: i64) -> Self {
        Self(raw as u64)
    }
}

impl Display for InodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InodeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::InvalidInode(format!("{s}: {e}")))
    }
}

impl From<u64> for InodeId {
    fn from(inode: u64) -> Self {
        Self(inode)
    }
}
