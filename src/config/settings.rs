//! Pipeline and source settings
//!
//! [`PipelineConfig`] is the user-facing, serde-friendly description of a
//! ring. Before anything is spawned it is checked by
//! [`PipelineConfig::validate`], which turns it into a [`RingShape`] whose
//! sizes are known to be usable.
//!
//! # Sizing rules
//!
//! - `stages`, `mailbox_capacity` and `result_capacity` must all be at least 1.
//! - `max_in_flight` defaults to `stages * mailbox_capacity` and may not
//!   exceed it. With at most that many items inside the ring, the forwarding
//!   cycle can never have every mailbox full while every stage is also holding
//!   an item, so the ring cannot wedge itself. A custom router whose `next`
//!   forms shorter cycles needs `max_in_flight <= mailbox_capacity`.
//! - `max_pending_results` defaults to `result_capacity`. It caps how many
//!   results the dispatcher pulls out of the sink and holds for the caller
//!   while seeding; once reached, `submit` hands the item back instead of
//!   buffering more.
//!
//! # Timeouts
//!
//! `stall_timeout_ms` bounds how long the dispatcher waits without anything
//! leaving the ring (seeding, quiescing, sending sentinels). It falls back to
//! `join_timeout_ms`. With neither set, those waits are unbounded.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::TerminationPolicy;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

use super::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAILBOX_CAPACITY, DEFAULT_PRIME_COUNT,
    DEFAULT_RESULT_CAPACITY, DEFAULT_STAGES,
};

/// Settings for one ring of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of stages (N)
    #[serde(default = "default_stages")]
    pub stages: usize,

    /// Capacity of every stage mailbox (K)
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Capacity of the result sink (R)
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,

    /// Upper bound on items admitted but not yet finished.
    /// `None` means `stages * mailbox_capacity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    /// What happens to items whose counter reaches zero
    #[serde(default)]
    pub termination: TerminationPolicy,

    /// Results held by the dispatcher before `submit` pushes back.
    /// `None` means `result_capacity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending_results: Option<usize>,

    /// Buffered observability events; 0 disables the event stream
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Give up waiting for stages to exit after this many milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_timeout_ms: Option<u64>,

    /// Fail with `Wedged` after this many milliseconds without progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_timeout_ms: Option<u64>,
}

fn default_stages() -> usize {
    DEFAULT_STAGES
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_result_capacity() -> usize {
    DEFAULT_RESULT_CAPACITY
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            max_in_flight: None,
            termination: TerminationPolicy::default(),
            max_pending_results: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            join_timeout_ms: None,
            stall_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    /// A ring of `stages` stages with `mailbox_capacity` slots each and a
    /// result sink of `result_capacity`. Everything else is default.
    pub fn new(stages: usize, mailbox_capacity: usize, result_capacity: usize) -> Self {
        Self {
            stages,
            mailbox_capacity,
            result_capacity,
            ..Default::default()
        }
    }

    pub fn with_termination(mut self, policy: TerminationPolicy) -> Self {
        self.termination = policy;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_pending_results(mut self, limit: usize) -> Self {
        self.max_pending_results = Some(limit);
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = Some(millis(timeout));
        self
    }

    /// Check every size and produce the shape the dispatcher builds from.
    pub fn validate(&self) -> PipelineResult<RingShape> {
        let stages = non_zero("stages", self.stages)?;
        let mailbox_capacity = non_zero("mailbox_capacity", self.mailbox_capacity)?;
        let result_capacity = non_zero("result_capacity", self.result_capacity)?;

        let ring_slots = stages.checked_mul(mailbox_capacity).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "stages ({}) * mailbox_capacity ({}) overflows",
                stages, mailbox_capacity
            ))
        })?;

        let max_in_flight = match self.max_in_flight {
            None => ring_slots,
            Some(limit) => {
                let limit = non_zero("max_in_flight", limit)?;
                if limit > ring_slots {
                    return Err(PipelineError::InvalidConfig(format!(
                        "max_in_flight ({}) exceeds stages * mailbox_capacity ({})",
                        limit, ring_slots
                    )));
                }
                limit
            }
        };

        let max_pending_results = match self.max_pending_results {
            None => result_capacity,
            Some(limit) => non_zero("max_pending_results", limit)?,
        };

        Ok(RingShape {
            stages,
            mailbox_capacity,
            result_capacity,
            max_in_flight,
            max_pending_results,
            termination: self.termination,
            event_capacity: self.event_capacity,
            join_timeout: self.join_timeout_ms.map(Duration::from_millis),
            stall_timeout: self
                .stall_timeout_ms
                .or(self.join_timeout_ms)
                .map(Duration::from_millis),
        })
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn non_zero(name: &str, value: usize) -> PipelineResult<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| PipelineError::InvalidConfig(format!("{} must be at least 1", name)))
}

/// A validated [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingShape {
    pub stages: NonZeroUsize,
    pub mailbox_capacity: NonZeroUsize,
    pub result_capacity: NonZeroUsize,
    pub max_in_flight: NonZeroUsize,
    pub max_pending_results: NonZeroUsize,
    pub termination: TerminationPolicy,
    pub event_capacity: usize,
    pub join_timeout: Option<Duration>,
    pub stall_timeout: Option<Duration>,
}

/// Settings for the prime item source used by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// How many primes to submit
    #[serde(default = "default_prime_count")]
    pub count: usize,
}

fn default_prime_count() -> usize {
    DEFAULT_PRIME_COUNT
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_PRIME_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape() {
        let shape = PipelineConfig::default().validate().unwrap();
        assert_eq!(shape.stages.get(), 8);
        assert_eq!(shape.mailbox_capacity.get(), 8);
        assert_eq!(shape.max_in_flight.get(), 64);
        assert_eq!(shape.termination, TerminationPolicy::Deliver);
        assert_eq!(shape.join_timeout, None);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        for config in [
            PipelineConfig::new(0, 8, 8),
            PipelineConfig::new(8, 0, 8),
            PipelineConfig::new(8, 8, 0),
            PipelineConfig::new(8, 8, 8).with_max_in_flight(0),
            PipelineConfig::new(8, 8, 8).with_max_pending_results(0),
        ] {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfig(_)), "{:?}", config);
        }
    }

    #[test]
    fn test_in_flight_limit_bounded_by_ring_slots() {
        let err = PipelineConfig::new(2, 2, 1)
            .with_max_in_flight(5)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let shape = PipelineConfig::new(2, 2, 1)
            .with_max_in_flight(4)
            .validate()
            .unwrap();
        assert_eq!(shape.max_in_flight.get(), 4);
    }

    #[test]
    fn test_join_timeout_round_trip() {
        let shape = PipelineConfig::default()
            .with_join_timeout(Duration::from_millis(250))
            .validate()
            .unwrap();
        assert_eq!(shape.join_timeout, Some(Duration::from_millis(250)));
        // Stall timeout falls back to the join timeout.
        assert_eq!(shape.stall_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_stall_timeout_overrides_join_timeout() {
        let shape = PipelineConfig::default()
            .with_join_timeout(Duration::from_millis(250))
            .with_stall_timeout(Duration::from_secs(3))
            .validate()
            .unwrap();
        assert_eq!(shape.join_timeout, Some(Duration::from_millis(250)));
        assert_eq!(shape.stall_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = PipelineConfig::default().with_join_timeout(Duration::MAX);
        assert_eq!(config.join_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_pending_results_default_to_result_capacity() {
        let shape = PipelineConfig::new(2, 2, 5).validate().unwrap();
        assert_eq!(shape.max_pending_results.get(), 5);

        let shape = PipelineConfig::new(2, 2, 5)
            .with_max_pending_results(100)
            .validate()
            .unwrap();
        assert_eq!(shape.max_pending_results.get(), 100);
    }
}
