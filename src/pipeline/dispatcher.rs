//! Dispatcher: owns the ring's lifecycle.
//!
//! The protocol is seed → shutdown → drain/join, and the types enforce it:
//!
//! ```text
//! Dispatcher::start ──► submit* ──► shutdown ──► Draining ──► collect* ──► join
//! ```
//!
//! - [`Dispatcher`] is the seeding phase. Only it can submit.
//! - [`Dispatcher::shutdown`] consumes it, so shutdown happens exactly once
//!   and nothing can be submitted afterwards. It first waits until every
//!   submitted item has left the ring, then sends one sentinel to each stage.
//!   No sentinel can overtake work that is still circulating.
//! - [`Draining`] hands out results and joins the workers.
//!
//! Whenever the dispatcher would block (admission window full, target mailbox
//! full, waiting for quiescence or for stages to exit) it keeps draining the
//! result sink and watching the fault channel. A small result sink therefore
//! never deadlocks the ring, and a stage that aborts turns into an error
//! instead of a hang.
//!
//! Results drained while seeding are held for the caller, at most
//! `max_pending_results` of them. Past that, `submit` returns
//! [`PipelineError::ResultsBacklogFull`] with the item instead of holding
//! more; [`Dispatcher::collect_ready`] and [`Dispatcher::collect`] hand them
//! out. [`Dispatcher::feed`] does this loop for a whole iterator.
//!
//! With a stall timeout configured, any wait during which nothing leaves the
//! ring for that long fails with [`PipelineError::Wedged`].

use crate::config::{PipelineConfig, RingShape};
use crate::pipeline::error::{PipelineError, PipelineResult, StageFault};
use crate::pipeline::event::{EventEmitter, StageEvent};
use crate::pipeline::id::StageId;
use crate::pipeline::item::{Envelope, Item};
use crate::pipeline::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::pipeline::router::{in_range, ModuloRouter, Router};
use crate::pipeline::stage::{Stage, StageLinks, StageReport, TerminationPolicy};
use crossbeam_channel::{
    after, bounded, never, select, unbounded, Receiver, RecvError, Sender, TrySendError,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: usize,
    pub submitted: u64,
    pub delivered: u64,
    pub discarded: u64,
    pub events_dropped: u64,
    pub per_stage: Vec<StageReport>,
}

/// Seeding phase of a running ring.
pub struct Dispatcher {
    ring: Ring,
}

impl Dispatcher {
    /// Validate `config`, build the ring with [`ModuloRouter`] and start one
    /// worker thread per stage. Returns once every worker is running.
    pub fn start(config: &PipelineConfig) -> PipelineResult<Self> {
        Self::with_router(config, Arc::new(ModuloRouter))
    }

    /// Like [`start`](Self::start) with a custom routing policy.
    pub fn with_router(config: &PipelineConfig, router: Arc<dyn Router>) -> PipelineResult<Self> {
        let shape = config.validate()?;
        let ring = Ring::start(shape, router)?;
        tracing::info!(
            "Ring started: {} stages, mailbox capacity {}, result capacity {}, window {}, {:?}",
            shape.stages,
            shape.mailbox_capacity,
            shape.result_capacity,
            shape.max_in_flight,
            shape.termination
        );
        Ok(Self { ring })
    }

    /// Route `item` to its first stage and hand it over. Blocks while the
    /// admission window or the target mailbox is full.
    ///
    /// Returns the ticket stamped on the item. If waiting would mean holding
    /// more than `max_pending_results` results, fails with
    /// [`PipelineError::ResultsBacklogFull`] and no ticket is used; collect
    /// and submit again.
    pub fn submit(&mut self, item: Item) -> PipelineResult<u64> {
        self.ring.admit(item)
    }

    /// Submit every item in order, passing held results to `on_results`
    /// whenever the backlog fills up. Returns how many were submitted.
    pub fn feed<I, F>(&mut self, items: I, mut on_results: F) -> PipelineResult<usize>
    where
        I: IntoIterator<Item = Item>,
        F: FnMut(Vec<Item>),
    {
        let mut count = 0;
        for item in items {
            loop {
                match self.submit(item) {
                    Ok(_) => break,
                    Err(PipelineError::ResultsBacklogFull { .. }) => on_results(self.collect_ready()),
                    Err(e) => return Err(e),
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Submit every item in order. Returns the results taken out of the ring
    /// along the way.
    pub fn submit_all(
        &mut self,
        items: impl IntoIterator<Item = Item>,
    ) -> PipelineResult<Vec<Item>> {
        let mut early = Vec::new();
        self.feed(items, |batch| early.extend(batch))?;
        Ok(early)
    }

    /// Take every result that has already come out of the ring, without
    /// waiting.
    pub fn collect_ready(&mut self) -> Vec<Item> {
        self.ring.take_ready()
    }

    /// Wait for `expected` results and take them in arrival order.
    ///
    /// Fails with [`PipelineError::ResultsExhausted`], consuming nothing, if
    /// fewer than `expected` could still arrive from what is in flight.
    pub fn collect(&mut self, expected: usize) -> PipelineResult<Vec<Item>> {
        self.ring.collect(expected)
    }

    pub fn stages(&self) -> usize {
        self.ring.peers.len()
    }

    /// Items submitted that have not yet left the ring.
    pub fn in_flight(&self) -> u64 {
        self.ring.tally.in_flight()
    }

    /// Results already pulled out of the sink.
    pub fn pending_results(&self) -> usize {
        self.ring.tally.backlog.len()
    }

    /// A receiver for the stage event stream, if enabled.
    pub fn events(&self) -> Option<Receiver<StageEvent>> {
        self.ring.event_rx.clone()
    }

    /// Wait for the ring to empty, then send one sentinel per stage.
    ///
    /// On error the remaining stages are stopped and joined before returning.
    pub fn shutdown(mut self) -> PipelineResult<Draining> {
        tracing::info!(
            "Shutting down: {} items still in flight",
            self.ring.tally.in_flight()
        );
        if let Err(e) = self.ring.quiesce() {
            tracing::error!("Ring failed while quiescing: {}", e);
            return Err(e);
        }
        if let Err(e) = self.ring.broadcast_shutdown() {
            tracing::error!("Ring failed while broadcasting shutdown: {}", e);
            return Err(e);
        }
        Ok(Draining { ring: self.ring })
    }
}

/// Draining phase: every stage has been sent its sentinel.
pub struct Draining {
    ring: Ring,
}

impl Draining {
    /// Take `expected` results in arrival order.
    ///
    /// Fails without consuming anything if fewer are available; after
    /// shutdown the ring is empty, so no more will ever arrive.
    pub fn collect(&mut self, expected: usize) -> PipelineResult<Vec<Item>> {
        self.ring.collect(expected)
    }

    /// Take every remaining result.
    pub fn collect_all(&mut self) -> Vec<Item> {
        self.ring.take_ready()
    }

    pub fn pending_results(&self) -> usize {
        self.ring.tally.backlog.len()
    }

    pub fn events(&self) -> Option<Receiver<StageEvent>> {
        self.ring.event_rx.clone()
    }

    /// Wait for every stage to stop.
    ///
    /// Fails with the first stage fault (or panic) instead of hanging, and
    /// with [`PipelineError::JoinTimeout`] if a join timeout is configured and
    /// exceeded.
    pub fn join(mut self) -> PipelineResult<RunReport> {
        self.ring.wait_for_exits(self.ring.shape.join_timeout)?;
        let per_stage = self.ring.join_workers()?;

        let report = RunReport {
            stages: self.ring.peers.len(),
            submitted: self.ring.tally.submitted,
            delivered: self.ring.tally.delivered,
            discarded: self.ring.tally.discarded,
            events_dropped: self.ring.events.dropped(),
            per_stage,
        };
        tracing::info!(
            "Ring stopped: {} submitted, {} delivered, {} discarded",
            report.submitted,
            report.delivered,
            report.discarded
        );
        Ok(report)
    }
}

// ── Internals ──

struct Worker {
    id: StageId,
    handle: JoinHandle<Result<StageReport, StageFault>>,
}

/// Reports a stage thread's exit, including by panic.
struct ExitNotice {
    stage: StageId,
    tx: Sender<StageId>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.tx.send(self.stage);
    }
}

/// Counters for items entering and leaving the ring.
#[derive(Debug, Default)]
struct Tally {
    submitted: u64,
    delivered: u64,
    discarded: u64,
    /// Exit notices received so far.
    exited: usize,
    /// Results pulled from the sink, in arrival order.
    backlog: VecDeque<Item>,
}

impl Tally {
    fn in_flight(&self) -> u64 {
        self.submitted - self.delivered - self.discarded
    }

    fn on_delivered(&mut self, item: Item) {
        self.delivered += 1;
        self.backlog.push_back(item);
    }

    fn on_discarded(&mut self, item: Item) {
        tracing::trace!("Retired {}", item);
        self.discarded += 1;
    }
}

/// The receiving ends the dispatcher watches while it waits.
struct Inlets {
    results: Mailbox<Item>,
    retired: Receiver<Item>,
    faults: Receiver<(StageId, StageFault)>,
    exits: Receiver<StageId>,
    /// Longest wait with nothing leaving the ring.
    stall: Option<Duration>,
}

impl Inlets {
    /// Block until something leaves the ring or a stage faults or exits.
    /// Stages below `sealed` have had their sentinel and may exit freely.
    fn pump(&self, tally: &mut Tally, sealed: usize) -> PipelineResult<()> {
        let timer = self.stall_timer();
        select! {
            recv(self.results.channel()) -> msg => self.on_result(tally, msg)?,
            recv(self.retired) -> msg => self.on_retired(tally, msg)?,
            recv(self.faults) -> msg => return Err(self.on_fault(tally, msg)),
            recv(self.exits) -> msg => self.on_exit(tally, sealed, msg)?,
            recv(timer) -> _ => return Err(self.wedged(tally)),
        }
        Ok(())
    }

    /// Put `envelope` into `target`'s mailbox, pumping while it is full.
    ///
    /// Once `hold` results are waiting, stops draining the sink and returns
    /// `Ok(false)` if the mailbox is still full.
    fn send(
        &self,
        tally: &mut Tally,
        sealed: usize,
        target: StageId,
        tx: &MailboxSender<Envelope>,
        envelope: Envelope,
        hold: Option<usize>,
    ) -> PipelineResult<bool> {
        loop {
            if hold.is_some_and(|limit| tally.backlog.len() >= limit) {
                return match tx.channel().try_send(envelope) {
                    Ok(()) => Ok(true),
                    Err(TrySendError::Full(_)) => Ok(false),
                    Err(TrySendError::Disconnected(_)) => Err(self.unavailable(target)),
                };
            }
            let timer = self.stall_timer();
            select! {
                send(tx.channel(), envelope) -> res => {
                    return res.map(|()| true).map_err(|_| self.unavailable(target));
                }
                recv(self.results.channel()) -> msg => self.on_result(tally, msg)?,
                recv(self.retired) -> msg => self.on_retired(tally, msg)?,
                recv(self.faults) -> msg => return Err(self.on_fault(tally, msg)),
                recv(self.exits) -> msg => self.on_exit(tally, sealed, msg)?,
                recv(timer) -> _ => return Err(self.wedged(tally)),
            }
        }
    }

    /// Fires after the stall timeout; never without one.
    fn stall_timer(&self) -> Receiver<Instant> {
        self.stall.map(after).unwrap_or_else(never)
    }

    fn wedged(&self, tally: &Tally) -> PipelineError {
        let waited = self.stall.unwrap_or_default();
        tracing::error!(
            "Nothing left the ring for {:?}; {} items in flight",
            waited,
            tally.in_flight()
        );
        PipelineError::Wedged {
            in_flight: tally.in_flight(),
            waited,
        }
    }

    fn on_result(&self, tally: &mut Tally, msg: Result<Item, RecvError>) -> PipelineResult<()> {
        let item = msg.map_err(|_| self.collapsed(tally))?;
        tally.on_delivered(item);
        Ok(())
    }

    fn on_retired(&self, tally: &mut Tally, msg: Result<Item, RecvError>) -> PipelineResult<()> {
        let item = msg.map_err(|_| self.collapsed(tally))?;
        tally.on_discarded(item);
        Ok(())
    }

    /// A stage that exits before its sentinel either faulted or panicked.
    fn on_exit(
        &self,
        tally: &mut Tally,
        sealed: usize,
        msg: Result<StageId, RecvError>,
    ) -> PipelineResult<()> {
        let stage = msg.map_err(|_| self.collapsed(tally))?;
        tally.exited += 1;
        if stage.index() < sealed {
            return Ok(());
        }
        match self.faults.try_recv() {
            Ok((stage, fault)) => Err(PipelineError::fault(stage, fault)),
            Err(_) => {
                tracing::error!("{} exited before shutdown", stage);
                Err(PipelineError::WorkerPanicked(stage))
            }
        }
    }

    fn on_fault(
        &self,
        tally: &Tally,
        msg: Result<(StageId, StageFault), RecvError>,
    ) -> PipelineError {
        match msg {
            Ok((stage, fault)) => PipelineError::fault(stage, fault),
            Err(_) => self.collapsed(tally),
        }
    }

    /// Every stage is gone. Prefer the fault that explains why.
    fn collapsed(&self, tally: &Tally) -> PipelineError {
        match self.faults.try_recv() {
            Ok((stage, fault)) => PipelineError::fault(stage, fault),
            Err(_) => PipelineError::RingCollapsed {
                in_flight: tally.in_flight(),
            },
        }
    }

    fn unavailable(&self, target: StageId) -> PipelineError {
        match self.faults.try_recv() {
            Ok((stage, fault)) => PipelineError::fault(stage, fault),
            Err(_) => PipelineError::StageUnavailable(target),
        }
    }
}

/// Everything the dispatcher owns while the ring runs.
struct Ring {
    shape: RingShape,
    router: Arc<dyn Router>,
    /// Producer halves of every stage mailbox, indexed by `StageId`.
    peers: Arc<[MailboxSender<Envelope>]>,
    inlets: Inlets,
    tally: Tally,
    workers: Vec<Worker>,
    /// Counter-only handle; the sending side lives in the stages.
    events: EventEmitter,
    event_rx: Option<Receiver<StageEvent>>,
    next_ticket: u64,
    /// Stages `0..sealed` have been sent their sentinel.
    sealed: usize,
    /// Set once pumping or sending has failed; items may be lost.
    failed: bool,
    /// Set when a join or a sentinel timed out: remaining threads are left to
    /// finish alone.
    detached: bool,
}

impl Ring {
    fn start(shape: RingShape, router: Arc<dyn Router>) -> PipelineResult<Self> {
        let n = shape.stages.get();

        let (senders, inboxes): (Vec<_>, Vec<_>) =
            (0..n).map(|_| mailbox(shape.mailbox_capacity)).unzip();
        let peers: Arc<[MailboxSender<Envelope>]> = senders.into();
        let (results_tx, results) = mailbox(shape.result_capacity);
        let (retired_tx, retired) = unbounded();
        let (faults_tx, faults) = unbounded();
        let (exits_tx, exits) = unbounded();
        let (ready_tx, ready_rx) = bounded(n);
        let (events, event_rx) = EventEmitter::new(shape.event_capacity);

        let links = StageLinks {
            peers: peers.clone(),
            results: results_tx,
            retired: retired_tx,
            faults: faults_tx,
            router: router.clone(),
            policy: shape.termination,
            events: events.clone(),
        };

        let mut ring = Ring {
            shape,
            router,
            peers,
            inlets: Inlets {
                results,
                retired,
                faults,
                exits,
                stall: shape.stall_timeout,
            },
            tally: Tally::default(),
            workers: Vec::with_capacity(n),
            events: events.counter_only(),
            event_rx,
            next_ticket: 0,
            sealed: 0,
            failed: false,
            detached: false,
        };

        for (index, inbox) in inboxes.into_iter().enumerate() {
            let id = StageId::from(index);
            let stage = Stage::new(id, inbox, links.clone());
            let notice = ExitNotice {
                stage: id,
                tx: exits_tx.clone(),
            };
            let ready = ready_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("ring-stage-{}", id.0))
                .spawn(move || {
                    let _notice = notice;
                    let _ = ready.send(id);
                    stage.run()
                });

            match spawned {
                Ok(handle) => ring.workers.push(Worker { id, handle }),
                Err(e) => {
                    tracing::error!("Failed to spawn {}: {}", id, e);
                    // Dropping `ring` stops the stages already running.
                    return Err(PipelineError::Spawn(e));
                }
            }
        }

        // The dispatcher must not hold producer halves of its own inlets, or
        // it could never tell that every stage has gone.
        drop(links);
        drop(exits_tx);
        drop(ready_tx);

        for _ in 0..ring.workers.len() {
            if ready_rx.recv().is_err() {
                break;
            }
        }

        Ok(ring)
    }

    fn admit(&mut self, item: Item) -> PipelineResult<u64> {
        if item.counter < 1 {
            return Err(PipelineError::InvalidItem { item });
        }

        let stages = self.peers.len();
        let target = self.router.route(&item, stages);
        let target =
            in_range(target, stages).ok_or(PipelineError::RouteOutOfRange { target, stages })?;

        let window = self.shape.max_in_flight.get() as u64;
        let hold = self.shape.max_pending_results.get();
        while self.tally.in_flight() >= window {
            if self.tally.backlog.len() >= hold {
                return Err(self.backlog_full(item));
            }
            self.pump()?;
        }

        let ticket = self.next_ticket;
        let ticketed = item.with_ticket(ticket);
        if !self.send(target, Envelope::Work(ticketed), Some(hold))? {
            return Err(self.backlog_full(item));
        }

        self.next_ticket += 1;
        self.tally.submitted += 1;
        tracing::trace!("Submitted {} to {}", ticketed, target);
        Ok(ticket)
    }

    fn backlog_full(&self, item: Item) -> PipelineError {
        let pending = self.tally.backlog.len();
        tracing::debug!("Holding {} results; handing {} back", pending, item);
        PipelineError::ResultsBacklogFull { item, pending }
    }

    /// Wait until `expected` results are held, then take them.
    fn collect(&mut self, expected: usize) -> PipelineResult<Vec<Item>> {
        loop {
            let pending = self.tally.backlog.len();
            if pending >= expected {
                return Ok(self.tally.backlog.drain(..expected).collect());
            }
            let reachable = match self.shape.termination {
                TerminationPolicy::Deliver => pending as u64 + self.tally.in_flight(),
                TerminationPolicy::Discard => pending as u64,
            };
            if reachable < expected as u64 {
                return Err(PipelineError::ResultsExhausted {
                    expected,
                    received: pending,
                });
            }
            self.pump()?;
        }
    }

    /// Drain whatever has already left the ring and take every held result.
    fn take_ready(&mut self) -> Vec<Item> {
        while let Ok(item) = self.inlets.retired.try_recv() {
            self.tally.on_discarded(item);
        }
        while let Ok(item) = self.inlets.results.try_get() {
            self.tally.on_delivered(item);
        }
        self.tally.backlog.drain(..).collect()
    }

    /// Block until every submitted item has been delivered or discarded.
    fn quiesce(&mut self) -> PipelineResult<()> {
        while self.tally.in_flight() > 0 {
            self.pump()?;
        }
        Ok(())
    }

    fn pump(&mut self) -> PipelineResult<()> {
        let result = self.inlets.pump(&mut self.tally, self.sealed);
        self.failed |= result.is_err();
        result
    }

    fn send(
        &mut self,
        target: StageId,
        envelope: Envelope,
        hold: Option<usize>,
    ) -> PipelineResult<bool> {
        let result = self.inlets.send(
            &mut self.tally,
            self.sealed,
            target,
            &self.peers[target.index()],
            envelope,
            hold,
        );
        self.failed |= result.is_err();
        result
    }

    /// One sentinel per stage, straight to its mailbox.
    fn broadcast_shutdown(&mut self) -> PipelineResult<()> {
        while self.sealed < self.peers.len() {
            self.send(StageId::from(self.sealed), Envelope::Shutdown, None)?;
            self.sealed += 1;
        }
        tracing::debug!("Sent {} shutdown sentinels", self.sealed);
        Ok(())
    }

    /// Sentinels to every stage still able to take one, ignoring faults.
    /// A stage whose mailbox stays full past the stall timeout is left
    /// running and the ring is detached.
    fn broadcast_best_effort(&mut self) {
        while self.sealed < self.peers.len() {
            let stage = StageId::from(self.sealed);
            match self.send(stage, Envelope::Shutdown, None) {
                Ok(_) | Err(PipelineError::StageUnavailable(_)) => self.sealed += 1,
                Err(PipelineError::RingCollapsed { .. }) => break,
                Err(e @ PipelineError::Wedged { .. }) => {
                    tracing::error!("Leaving {} running: {}", stage, e);
                    self.detached = true;
                    self.sealed += 1;
                }
                Err(e) => tracing::warn!("Ignoring during shutdown: {}", e),
            }
        }
    }

    /// Wait until every worker thread has exited, still draining results.
    fn wait_for_exits(&mut self, timeout: Option<Duration>) -> PipelineResult<()> {
        let timer = timeout.map(after).unwrap_or_else(never);
        let closed = never();
        let mut results_open = true;
        let mut exits_open = true;

        while exits_open && self.tally.exited < self.workers.len() {
            let results = if results_open {
                self.inlets.results.channel()
            } else {
                &closed
            };
            select! {
                recv(self.inlets.exits) -> msg => match msg {
                    Ok(_) => self.tally.exited += 1,
                    Err(_) => exits_open = false,
                },
                recv(results) -> msg => match msg {
                    Ok(item) => self.tally.on_delivered(item),
                    Err(_) => results_open = false,
                },
                recv(timer) -> _ => {
                    let still_running = self.workers.len().saturating_sub(self.tally.exited);
                    tracing::error!("{} stages still running after {:?}", still_running, timeout);
                    self.detached = true;
                    return Err(PipelineError::JoinTimeout(timeout.unwrap_or_default()));
                }
            }
        }
        Ok(())
    }

    /// Join every worker. Reports from clean exits are returned; otherwise
    /// the first fault or panic.
    fn join_workers(&mut self) -> PipelineResult<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(self.workers.len());
        let mut first_error = None;

        for worker in self.workers.drain(..) {
            match worker.handle.join() {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(fault)) => {
                    first_error.get_or_insert(PipelineError::fault(worker.id, fault));
                }
                Err(_) => {
                    tracing::error!("{} panicked", worker.id);
                    first_error.get_or_insert(PipelineError::WorkerPanicked(worker.id));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    /// Stop and join whatever is still running, logging instead of failing.
    fn abort(&mut self) {
        if self.sealed < self.peers.len() {
            // After a failure the missing items may never come back.
            if self.failed {
                tracing::warn!("Stopping ring with {} items unaccounted for", self.tally.in_flight());
            } else if let Err(e) = self.quiesce() {
                tracing::warn!("Stopping ring without quiescing: {}", e);
            }
            self.broadcast_best_effort();
        }
        if self.detached {
            return;
        }
        if let Err(e) = self.wait_for_exits(self.shape.join_timeout) {
            tracing::warn!("Stopping ring: {}", e);
            if self.detached {
                return;
            }
        }
        if let Err(e) = self.join_workers() {
            tracing::warn!("Ring stopped with error: {}", e);
        }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if self.workers.is_empty() || self.detached {
            return;
        }
        if self.sealed < self.peers.len() {
            tracing::warn!(
                "Ring dropped before shutdown; stopping {} stages",
                self.workers.len()
            );
        }
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::StageAction;

    #[test]
    fn test_reference_scenario() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(8, 8, 8)).unwrap();
        let ticket = dispatcher.submit(Item::new(2, 2)).unwrap();
        assert_eq!(ticket, 0);

        let mut draining = dispatcher.shutdown().unwrap();
        let results = draining.collect(1).unwrap();
        assert_eq!(results, vec![Item::new(7, 0)]);

        let report = draining.join().unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.per_stage.len(), 8);
        assert_eq!(report.per_stage[2].forwarded, 1);
        assert_eq!(report.per_stage[3].delivered, 1);
    }

    #[test]
    fn test_single_stage_self_loop() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(1, 1, 1)).unwrap();
        dispatcher.submit(Item::new(5, 3)).unwrap();
        let mut draining = dispatcher.shutdown().unwrap();
        assert_eq!(draining.collect(1).unwrap(), vec![Item::new(5, 0)]);
        let report = draining.join().unwrap();
        assert_eq!(report.per_stage[0].processed, 3);
    }

    #[test]
    fn test_tickets_are_sequential() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(2, 2, 8)).unwrap();
        let tickets: Vec<_> = (0..5)
            .map(|v| dispatcher.submit(Item::new(v, 1)).unwrap())
            .collect();
        assert_eq!(tickets, vec![0, 1, 2, 3, 4]);
        let mut draining = dispatcher.shutdown().unwrap();
        let mut seen: Vec<_> = draining.collect_all().iter().map(|i| i.ticket).collect();
        seen.sort_unstable();
        assert_eq!(seen, tickets);
        draining.join().unwrap();
    }

    #[test]
    fn test_rejects_unfinishable_item() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(2, 2, 2)).unwrap();
        let err = dispatcher.submit(Item::new(1, 0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidItem { .. }));
        assert_eq!(dispatcher.in_flight(), 0);
        dispatcher.shutdown().unwrap().join().unwrap();
    }

    #[test]
    fn test_collect_more_than_available() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(2, 2, 2)).unwrap();
        dispatcher.submit(Item::new(1, 1)).unwrap();
        let mut draining = dispatcher.shutdown().unwrap();
        let err = draining.collect(2).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResultsExhausted {
                expected: 2,
                received: 1
            }
        ));
        // Nothing was consumed by the failed call.
        assert_eq!(draining.collect(1).unwrap().len(), 1);
        draining.join().unwrap();
    }

    #[test]
    fn test_discard_policy() {
        let config = PipelineConfig::new(3, 2, 1).with_termination(TerminationPolicy::Discard);
        let mut dispatcher = Dispatcher::start(&config).unwrap();
        dispatcher
            .submit_all((1..=6).map(|v| Item::new(v, v)))
            .unwrap();
        let mut draining = dispatcher.shutdown().unwrap();
        assert!(draining.collect_all().is_empty());
        let report = draining.join().unwrap();
        assert_eq!(report.discarded, 6);
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn test_events_follow_the_item() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(8, 8, 8)).unwrap();
        let events = dispatcher.events().unwrap();
        dispatcher.submit(Item::new(2, 2)).unwrap();
        dispatcher.shutdown().unwrap().join().unwrap();

        let all: Vec<_> = events.try_iter().collect();
        // Stage 3 may publish before stage 2 does; match by stage.
        let at = |stage: u32| {
            all.iter()
                .find(|e| e.stage == StageId(stage) && e.item.is_some())
                .copied()
                .unwrap()
        };
        assert_eq!(all.iter().filter(|e| e.item.is_some()).count(), 2);
        assert_eq!(at(2).action, StageAction::Forwarded(StageId(3)));
        assert_eq!(at(2).item, Some(Item::new(4, 1)));
        assert_eq!(at(3).action, StageAction::Delivered);
        assert_eq!(at(3).item, Some(Item::new(7, 0)));

        let stopped = all
            .iter()
            .filter(|e| e.action == StageAction::Stopped)
            .count();
        assert_eq!(stopped, 8);
    }

    #[test]
    fn test_drop_without_shutdown_stops_workers() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(4, 2, 1)).unwrap();
        let events = dispatcher.events().unwrap();
        dispatcher
            .submit_all((0..8).map(|v| Item::new(v, 3)))
            .unwrap();
        drop(dispatcher);

        // Every stage reported Stopped, and all senders are gone.
        let stopped = events
            .iter()
            .filter(|e| e.action == StageAction::Stopped)
            .count();
        assert_eq!(stopped, 4);
    }

    #[test]
    fn test_backlog_full_hands_item_back() {
        // One slot everywhere: the window is 1 and one held result is the limit.
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(1, 1, 1)).unwrap();
        assert_eq!(dispatcher.submit(Item::new(10, 1)).unwrap(), 0);
        assert_eq!(dispatcher.submit(Item::new(11, 1)).unwrap(), 1);

        let err = dispatcher.submit(Item::new(12, 1)).unwrap_err();
        match err {
            PipelineError::ResultsBacklogFull { item, pending } => {
                assert_eq!(item, Item::new(12, 1));
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(dispatcher.pending_results(), 1);

        let early = dispatcher.collect_ready();
        assert_eq!(early[0].ticket, 0);
        assert_eq!(dispatcher.pending_results(), 0);

        // The rejected item did not use up a ticket.
        assert_eq!(dispatcher.submit(Item::new(12, 1)).unwrap(), 2);

        let mut draining = dispatcher.shutdown().unwrap();
        let mut tickets: Vec<_> = early
            .into_iter()
            .chain(draining.collect_all())
            .map(|item| item.ticket)
            .collect();
        tickets.sort_unstable();
        assert_eq!(tickets, vec![0, 1, 2]);
        draining.join().unwrap();
    }

    #[test]
    fn test_collect_while_seeding() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(4, 2, 8)).unwrap();
        for v in 0..6 {
            dispatcher.submit(Item::new(v, 2)).unwrap();
        }
        let first = dispatcher.collect(3).unwrap();
        assert_eq!(first.len(), 3);
        assert!(dispatcher.in_flight() <= 3);

        // Only three more can ever come out.
        let err = dispatcher.collect(4).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResultsExhausted { expected: 4, .. }
        ));

        dispatcher.submit(Item::new(6, 2)).unwrap();
        let rest = dispatcher.collect(4).unwrap();
        assert_eq!(rest.len(), 4);

        let mut draining = dispatcher.shutdown().unwrap();
        assert!(draining.collect_all().is_empty());
        assert_eq!(draining.join().unwrap().delivered, 7);
    }

    #[test]
    fn test_feed_keeps_backlog_bounded() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(2, 1, 1)).unwrap();
        let mut taken = 0;
        let mut largest = 0;
        let submitted = dispatcher
            .feed((0..2_000).map(|v| Item::new(v, 3)), |batch| {
                largest = largest.max(batch.len());
                taken += batch.len();
            })
            .unwrap();
        assert_eq!(submitted, 2_000);
        // A batch is the held results plus whatever was sitting in the sink.
        assert!(largest <= 2, "batch of {}", largest);
        assert!(dispatcher.pending_results() <= 1);

        let mut draining = dispatcher.shutdown().unwrap();
        // At most the held limit plus everything that was in flight.
        assert!(draining.pending_results() <= 1 + 2);
        taken += draining.collect_all().len();
        assert_eq!(taken, 2_000);
        draining.join().unwrap();
    }

    #[test]
    fn test_discard_collect_does_not_wait() {
        let config = PipelineConfig::new(2, 2, 1).with_termination(TerminationPolicy::Discard);
        let mut dispatcher = Dispatcher::start(&config).unwrap();
        dispatcher.submit(Item::new(1, 5)).unwrap();
        let err = dispatcher.collect(1).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResultsExhausted {
                expected: 1,
                received: 0
            }
        ));
        dispatcher.shutdown().unwrap().join().unwrap();
    }

    #[test]
    fn test_join_timeout_while_stages_idle() {
        let mut dispatcher = Dispatcher::start(&PipelineConfig::new(2, 1, 1)).unwrap();
        // No sentinels sent, so neither stage can exit.
        let err = dispatcher
            .ring
            .wait_for_exits(Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::JoinTimeout(t) if t == Duration::from_millis(50)));
        assert!(dispatcher.ring.detached);

        // Let drop stop and join the stages normally.
        dispatcher.ring.detached = false;
        drop(dispatcher);
    }
}
