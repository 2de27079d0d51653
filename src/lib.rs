//! # ring-relay: bounded-mailbox worker ring
//!
//! A fixed ring of worker stages, each owning a bounded FIFO mailbox, passes
//! items from stage to stage until a per-item counter runs out. Finished items
//! are delivered to a bounded result sink that the dispatcher drains.
//!
//! ## Architecture
//!
//! - **Pipeline**: mailboxes, stages, routing and the dispatcher lifecycle
//! - **Config**: TOML-backed settings with validation and defaults
//! - **Source**: the prime generator the binary seeds the ring with
//! - **Communication**: crossbeam channels between every pair of threads
//!
//! ## Example
//!
//! ```no_run
//! use ring_relay::{config::PipelineConfig, pipeline::{Dispatcher, Item}};
//!
//! fn main() -> ring_relay::Result<()> {
//!     let mut dispatcher = Dispatcher::start(&PipelineConfig::new(8, 8, 8))?;
//!     dispatcher.submit(Item::new(2, 2))?;
//!
//!     let mut draining = dispatcher.shutdown()?;
//!     let results = draining.collect(1)?;
//!     assert_eq!((results[0].value, results[0].counter), (7, 0));
//!
//!     let report = draining.join()?;
//!     println!("{} delivered", report.delivered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod source;

// Re-export commonly used types
pub use config::{PipelineConfig, RelayConfig};
pub use error::{RelayError, Result};
pub use pipeline::{Dispatcher, Draining, Item, RunReport, StageId, TerminationPolicy};
