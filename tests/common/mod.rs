//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use ring_relay::pipeline::{Dispatcher, Item, RunReport};
use ring_relay::PipelineConfig;
use std::time::Duration;

/// Generous join timeout so a regression fails instead of hanging the suite
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Where the default modulo ring leaves `item`: start at `value mod n`, then
/// visit `counter` consecutive stages, adding each stage id to the value.
pub fn expected_final(item: Item, stages: usize) -> Item {
    let n = stages as i64;
    let mut stage = item.value.rem_euclid(n);
    let mut value = item.value;
    for _ in 0..item.counter {
        value += stage;
        stage = (stage + 1) % n;
    }
    Item {
        value,
        counter: 0,
        ..item
    }
}

/// Submit `items`, shut down, take every result and join.
pub fn run_ring(config: &PipelineConfig, items: &[Item]) -> (Vec<Item>, RunReport) {
    let config = config.clone().with_join_timeout(test_timeout());
    let mut dispatcher = Dispatcher::start(&config).expect("ring should start");
    let mut results = dispatcher
        .submit_all(items.iter().copied())
        .expect("submit should succeed");
    let mut draining = dispatcher.shutdown().expect("shutdown should succeed");
    results.extend(draining.collect_all());
    let report = draining.join().expect("join should succeed");
    (results, report)
}

/// Results sorted by ticket, for comparing against submission order
pub fn by_ticket(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by_key(|item| item.ticket);
    items
}
