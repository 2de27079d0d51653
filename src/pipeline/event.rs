//! Observability events emitted by stages.
//!
//! Events are a side channel for whatever renders progress (the CLI logs
//! them). They never take part in correctness: stages publish with
//! `try_send`, so a slow or missing reader costs dropped events, not a
//! stalled ring.

use crate::pipeline::id::StageId;
use crate::pipeline::item::Item;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a stage did with an item (or with itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "to", rename_all = "snake_case")]
pub enum StageAction {
    /// Passed on to another stage's mailbox.
    Forwarded(StageId),
    /// Placed in the result sink.
    Delivered,
    /// Finished and retired without reaching the result sink.
    Discarded,
    /// Consumed its sentinel and exited.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: StageId,
    /// The item after this stage's visit. `None` for `Stopped`.
    pub item: Option<Item>,
    #[serde(flatten)]
    pub action: StageAction,
}

impl StageEvent {
    pub fn item(stage: StageId, item: Item, action: StageAction) -> Self {
        Self {
            stage,
            item: Some(item),
            action,
        }
    }

    pub fn stopped(stage: StageId) -> Self {
        Self {
            stage,
            item: None,
            action: StageAction::Stopped,
        }
    }
}

/// Publishing side of the event stream, cloned into every stage.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<Sender<StageEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// An emitter with a bounded buffer of `capacity` events, or a disabled
    /// one when `capacity == 0`.
    pub fn new(capacity: usize) -> (Self, Option<Receiver<StageEvent>>) {
        if capacity == 0 {
            return (Self::default(), None);
        }
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            Some(rx),
        )
    }

    pub fn emit(&self, event: StageEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// A handle that shares the drop counter but publishes nothing. Holding
    /// it does not keep the event channel open.
    pub fn counter_only(&self) -> Self {
        Self {
            tx: None,
            dropped: self.dropped.clone(),
        }
    }

    /// Events that could not be published.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}
