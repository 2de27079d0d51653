//! Work items and the envelopes that carry them between stages.
//!
//! A stage mailbox never holds a bare [`Item`]: it holds an [`Envelope`],
//! which is either real work or the shutdown sentinel. Keeping the sentinel
//! as its own variant means no counter value is reserved, and a sentinel can
//! never be mistaken for (or transformed into) a payload.

use crate::pipeline::id::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work travelling around the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    /// Identity assigned by the dispatcher at submit time.
    pub ticket: u64,
    /// Payload, incremented by the id of every stage the item visits.
    pub value: i64,
    /// Remaining stage visits. Zero means finished.
    pub counter: i64,
}

impl Item {
    /// Create an item that has not been submitted yet (ticket 0).
    pub fn new(value: i64, counter: i64) -> Self {
        Self {
            ticket: 0,
            value,
            counter,
        }
    }

    pub(crate) fn with_ticket(mut self, ticket: u64) -> Self {
        self.ticket = ticket;
        self
    }

    /// True once the item has no visits left.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.counter == 0
    }

    /// The item after one visit to `stage`: the stage weight is added and one
    /// unit of counter consumed. `None` if the value would overflow.
    #[inline]
    pub fn visited(self, stage: StageId) -> Option<Item> {
        Some(Item {
            value: self.value.checked_add(stage.weight())?,
            counter: self.counter - 1,
            ..self
        })
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} value={} counter={}",
            self.ticket, self.value, self.counter
        )
    }
}

/// What a mailbox actually carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Work(Item),
    /// Stop the receiving stage. Consumed, never forwarded.
    Shutdown,
}

impl Envelope {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Envelope::Shutdown)
    }
}

impl From<Item> for Envelope {
    fn from(item: Item) -> Self {
        Envelope::Work(item)
    }
}
