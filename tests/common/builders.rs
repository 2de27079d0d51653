//! Test data builders for creating test objects

use ring_relay::pipeline::Item;
use ring_relay::{PipelineConfig, TerminationPolicy};

/// Builder for ring configurations
pub struct RingBuilder {
    stages: usize,
    mailbox_capacity: usize,
    result_capacity: usize,
    termination: TerminationPolicy,
    max_in_flight: Option<usize>,
}

impl RingBuilder {
    pub fn new(stages: usize) -> Self {
        Self {
            stages,
            mailbox_capacity: 4,
            result_capacity: 4,
            termination: TerminationPolicy::Deliver,
            max_in_flight: None,
        }
    }

    pub fn mailbox(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn results(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity;
        self
    }

    pub fn discard(mut self) -> Self {
        self.termination = TerminationPolicy::Discard;
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let config = PipelineConfig::new(self.stages, self.mailbox_capacity, self.result_capacity)
            .with_termination(self.termination);
        match self.max_in_flight {
            Some(limit) => config.with_max_in_flight(limit),
            None => config,
        }
    }
}

/// `count` items `{ value: start + i, counter: counter }`
pub fn items(start: i64, count: usize, counter: i64) -> Vec<Item> {
    (0..count as i64)
        .map(|i| Item::new(start + i, counter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_builder() {
        let config = RingBuilder::new(3).mailbox(2).results(1).discard().build();

        assert_eq!(config.stages, 3);
        assert_eq!(config.mailbox_capacity, 2);
        assert_eq!(config.result_capacity, 1);
        assert_eq!(config.termination, TerminationPolicy::Discard);
    }
}
