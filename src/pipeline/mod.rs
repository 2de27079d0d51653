//! Bounded-mailbox worker ring.
//!
//! A fixed set of stages, each on its own thread and each the only consumer
//! of a bounded FIFO mailbox, pass items around the ring until an item's
//! counter runs out. Finished items land in a bounded result sink that the
//! dispatcher drains.
//!
//! # Architecture
//!
//! ```text
//!              route(item)
//! [Dispatcher] ──────────► [Stage 0] ──► [Stage 1] ──► ... ──► [Stage N-1]
//!      ▲                       ▲                                    │
//!      │                       └────────────── next(id) ────────────┘
//!      │
//!      └──── [ResultSink] ◄── any stage, once counter == 0
//! ```
//!
//! # Design
//!
//! - **Owned mailboxes**: [`Mailbox`] is not `Clone`, so each mailbox has
//!   exactly one consumer. Producers hold cloned [`MailboxSender`]s.
//! - **Tagged sentinel**: shutdown is [`Envelope::Shutdown`], never a magic
//!   counter value.
//! - **Typestate lifecycle**: [`Dispatcher`] seeds, [`Dispatcher::shutdown`]
//!   turns it into [`Draining`], which collects and joins.
//! - **Faults, not hangs**: stages report invariant violations on a fault
//!   channel the dispatcher watches whenever it waits.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod id;
pub mod item;
pub mod mailbox;
pub mod router;
pub mod stage;

pub use dispatcher::{Dispatcher, Draining, RunReport};
pub use error::{PipelineError, PipelineResult, StageFault};
pub use event::{EventEmitter, StageAction, StageEvent};
pub use id::StageId;
pub use item::{Envelope, Item};
pub use mailbox::{mailbox, GetError, Mailbox, MailboxSender, PutError};
pub use router::{ModuloRouter, Router};
pub use stage::{Stage, StageLinks, StageReport, StageState, TerminationPolicy};
