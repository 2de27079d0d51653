//! Stage workers.
//!
//! Each stage owns the consumer half of one mailbox and runs on its own
//! thread. Per envelope:
//!
//! 1. Take the head of the mailbox (blocks while empty).
//! 2. A shutdown sentinel moves the stage to `Stopped`; it is consumed here.
//! 3. Work items get one visit: `value += stage id`, `counter -= 1`.
//! 4. Unfinished items go to `router.next(id)`; finished ones leave the ring
//!    according to the [`TerminationPolicy`].
//! 5. An event describing the outcome is published.
//!
//! A stage never fails in normal operation. Anything unexpected (a malformed
//! counter, an out of range route, a vanished peer) aborts the stage and is
//! reported on the fault channel so the dispatcher can fail loudly instead of
//! waiting forever.

use crate::pipeline::error::StageFault;
use crate::pipeline::event::{EventEmitter, StageAction, StageEvent};
use crate::pipeline::id::StageId;
use crate::pipeline::item::{Envelope, Item};
use crate::pipeline::mailbox::{Mailbox, MailboxSender};
use crate::pipeline::router::{in_range, Router};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What happens to an item whose counter reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Put it in the result sink.
    #[default]
    Deliver,
    /// Retire it in place. Nothing reaches the result sink.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    Stopped,
}

/// Per-stage counters, returned when the stage stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    pub processed: u64,
    pub forwarded: u64,
    pub delivered: u64,
    pub discarded: u64,
}

/// Everything a stage can reach besides its own mailbox. Shared by all stages.
#[derive(Debug, Clone)]
pub struct StageLinks {
    /// Producer halves of every stage mailbox, indexed by `StageId`.
    pub peers: Arc<[MailboxSender<Envelope>]>,
    pub results: MailboxSender<Item>,
    /// Finished items under [`TerminationPolicy::Discard`].
    pub retired: Sender<Item>,
    pub faults: Sender<(StageId, StageFault)>,
    pub router: Arc<dyn Router>,
    pub policy: TerminationPolicy,
    pub events: EventEmitter,
}

pub struct Stage {
    id: StageId,
    inbox: Mailbox<Envelope>,
    links: StageLinks,
    state: StageState,
    report: StageReport,
}

impl Stage {
    pub fn new(id: StageId, inbox: Mailbox<Envelope>, links: StageLinks) -> Self {
        Self {
            id,
            inbox,
            links,
            state: StageState::Running,
            report: StageReport {
                stage: id,
                ..Default::default()
            },
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Run until the shutdown sentinel arrives or the stage aborts.
    ///
    /// A fault is published on the fault channel before it is returned.
    pub fn run(mut self) -> Result<StageReport, StageFault> {
        tracing::debug!("{} started", self.id);

        let outcome = self.run_loop();
        match &outcome {
            Ok(report) => {
                tracing::debug!(
                    "{} stopped after {} items ({} forwarded, {} delivered, {} discarded)",
                    self.id,
                    report.processed,
                    report.forwarded,
                    report.delivered,
                    report.discarded
                );
            }
            Err(fault) => {
                tracing::error!("{} aborted: {}", self.id, fault);
                let _ = self.links.faults.send((self.id, fault.clone()));
            }
        }
        outcome
    }

    fn run_loop(&mut self) -> Result<StageReport, StageFault> {
        while self.state == StageState::Running {
            let envelope = self.inbox.get().map_err(|_| StageFault::MailboxClosed)?;
            self.step(envelope)?;
        }
        self.check_drained()?;
        Ok(self.report)
    }

    /// Handle one envelope.
    pub fn step(&mut self, envelope: Envelope) -> Result<(), StageFault> {
        let item = match envelope {
            Envelope::Shutdown if self.state == StageState::Stopped => {
                return Err(StageFault::DuplicateShutdown);
            }
            Envelope::Shutdown => {
                self.state = StageState::Stopped;
                self.links.events.emit(StageEvent::stopped(self.id));
                return Ok(());
            }
            Envelope::Work(item) => item,
        };

        if self.state == StageState::Stopped {
            return Err(StageFault::WorkAfterStop { item });
        }
        if item.counter < 1 {
            return Err(StageFault::MalformedItem { item });
        }

        let item = item
            .visited(self.id)
            .ok_or(StageFault::ValueOverflow { item })?;
        self.report.processed += 1;

        let action = if item.is_finished() {
            self.finish(item)?
        } else {
            self.forward(item)?
        };

        tracing::trace!(
            "{}: value={} counter={} -> {:?}",
            self.id,
            item.value,
            item.counter,
            action
        );
        self.links.events.emit(StageEvent::item(self.id, item, action));
        Ok(())
    }

    fn forward(&mut self, item: Item) -> Result<StageAction, StageFault> {
        let stages = self.links.peers.len();
        let target = self.links.router.next(self.id, stages);
        let target = in_range(target, stages).ok_or(StageFault::RouteOutOfRange {
            item,
            target,
            stages,
        })?;

        self.links.peers[target.index()]
            .put(Envelope::Work(item))
            .map_err(|_| StageFault::Disconnected {
                target: target.to_string(),
                item,
            })?;

        self.report.forwarded += 1;
        Ok(StageAction::Forwarded(target))
    }

    fn finish(&mut self, item: Item) -> Result<StageAction, StageFault> {
        match self.links.policy {
            TerminationPolicy::Deliver => {
                self.links
                    .results
                    .put(item)
                    .map_err(|_| StageFault::Disconnected {
                        target: "result sink".to_string(),
                        item,
                    })?;
                self.report.delivered += 1;
                Ok(StageAction::Delivered)
            }
            TerminationPolicy::Discard => {
                // Only the dispatcher's bookkeeping listens here; if it is
                // gone there is nobody left to account to.
                let _ = self.links.retired.send(item);
                self.report.discarded += 1;
                Ok(StageAction::Discarded)
            }
        }
    }

    /// After the sentinel, anything still queued was sent to a stopped stage.
    fn check_drained(&mut self) -> Result<(), StageFault> {
        match self.inbox.try_get() {
            Ok(Envelope::Work(item)) => Err(StageFault::WorkAfterStop { item }),
            Ok(Envelope::Shutdown) => Err(StageFault::DuplicateShutdown),
            Err(_) => Ok(()),
        }
    }
}
