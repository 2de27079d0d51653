//! Routing policy for the ring.
//!
//! Two decisions are made per item:
//!
//! - [`Router::route`]: which stage receives a freshly submitted item.
//! - [`Router::next`]: which stage a stage forwards to after its visit.
//!
//! Both must be pure and total over `[0, stages)`. The dispatcher and the
//! stages check the returned id against the ring size anyway; an out of range
//! answer is reported as a fault instead of indexing out of bounds.

use crate::pipeline::id::StageId;
use crate::pipeline::item::Item;
use std::fmt;

/// Maps items and stages onto stage ids. Shared by every stage thread.
pub trait Router: Send + Sync + fmt::Debug {
    /// Stage that receives `item` when it first enters the ring.
    fn route(&self, item: &Item, stages: usize) -> StageId;

    /// Stage that `from` forwards unfinished items to.
    fn next(&self, from: StageId, stages: usize) -> StageId;
}

/// `route = value mod N`, `next = (id + 1) mod N`.
///
/// Negative values use the Euclidean remainder, so `-1` lands on `N - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuloRouter;

impl Router for ModuloRouter {
    fn route(&self, item: &Item, stages: usize) -> StageId {
        debug_assert!(stages > 0);
        StageId(item.value.rem_euclid(stages as i64) as u32)
    }

    fn next(&self, from: StageId, stages: usize) -> StageId {
        debug_assert!(stages > 0);
        StageId(((from.index() + 1) % stages) as u32)
    }
}

/// Checks a router answer against the ring size.
pub(crate) fn in_range(id: StageId, stages: usize) -> Option<StageId> {
    (id.index() < stages).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_value_mod_n() {
        let router = ModuloRouter;
        assert_eq!(router.route(&Item::new(2, 2), 8), StageId(2));
        assert_eq!(router.route(&Item::new(13, 13), 8), StageId(5));
        assert_eq!(router.route(&Item::new(5, 3), 1), StageId(0));
    }

    #[test]
    fn test_route_negative_values_stay_in_range() {
        let router = ModuloRouter;
        assert_eq!(router.route(&Item::new(-1, 1), 8), StageId(7));
        assert_eq!(router.route(&Item::new(-16, 1), 8), StageId(0));
    }

    #[test]
    fn test_next_wraps_around() {
        let router = ModuloRouter;
        assert_eq!(router.next(StageId(2), 8), StageId(3));
        assert_eq!(router.next(StageId(7), 8), StageId(0));
        assert_eq!(router.next(StageId(0), 1), StageId(0));
    }

    #[test]
    fn test_in_range() {
        assert_eq!(in_range(StageId(3), 4), Some(StageId(3)));
        assert_eq!(in_range(StageId(4), 4), None);
    }
}
