//! Pipeline-specific error types.

use crate::pipeline::id::StageId;
use crate::pipeline::item::Item;
use thiserror::Error;

/// Why a stage aborted. Every variant is an invariant violation: stages do
/// not fail during normal operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageFault {
    #[error("malformed item {item}: counter must be at least 1 on arrival")]
    MalformedItem { item: Item },

    #[error("router sent {item} to {target:?}, outside a ring of {stages}")]
    RouteOutOfRange {
        item: Item,
        target: StageId,
        stages: usize,
    },

    #[error("value of {item} overflows on this visit")]
    ValueOverflow { item: Item },

    #[error("received {item} after stopping")]
    WorkAfterStop { item: Item },

    #[error("received a second shutdown sentinel")]
    DuplicateShutdown,

    #[error("{target} is gone, could not hand over {item}")]
    Disconnected { target: String, item: Item },

    #[error("mailbox closed before a shutdown sentinel arrived")]
    MailboxClosed,
}

/// Errors surfaced by the dispatcher.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("{stage} aborted: {fault}")]
    StageFault { stage: StageId, fault: StageFault },

    #[error("{0} is no longer accepting items")]
    StageUnavailable(StageId),

    #[error("Router sent item to {target:?}, outside a ring of {stages}")]
    RouteOutOfRange { target: StageId, stages: usize },

    #[error("Rejected {item}: counter must be at least 1")]
    InvalidItem { item: Item },

    #[error("All stages exited with {in_flight} items still in flight")]
    RingCollapsed { in_flight: u64 },

    #[error("Worker thread for {0} panicked")]
    WorkerPanicked(StageId),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Result sink exhausted: expected {expected} results, received {received}")]
    ResultsExhausted { expected: usize, received: usize },

    #[error("Stages still running after {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("{pending} results waiting to be collected; could not admit {item}")]
    ResultsBacklogFull { item: Item, pending: usize },

    #[error("Ring made no progress for {waited:?} with {in_flight} items in flight")]
    Wedged {
        in_flight: u64,
        waited: std::time::Duration,
    },
}

impl PipelineError {
    pub fn fault(stage: StageId, fault: StageFault) -> Self {
        PipelineError::StageFault { stage, fault }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
