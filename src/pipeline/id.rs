//! Identity types for the pipeline system.
//!
//! `StageId` is a newtype over `u32` that serves as a direct index into the
//! dispatcher's stage table, providing O(1) lookup of a stage's mailbox.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into the dispatcher's stage table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u32);

impl StageId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Value added to an item's payload when it passes through this stage.
    #[inline]
    pub fn weight(self) -> i64 {
        i64::from(self.0)
    }

    /// Iterate over the ids of a ring with `stages` members.
    pub fn all(stages: usize) -> impl Iterator<Item = StageId> {
        (0..stages as u32).map(StageId)
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}

impl From<usize> for StageId {
    fn from(index: usize) -> Self {
        StageId(index as u32)
    }
}
