//! One price-time-priority book.
//!
//! Bids iterate highest-subticks-first, asks lowest-first; within a level,
//! arrival order wins. Arrival is a monotonic sequence number assigned by the
//! memclob, never wall clock.

use crate::clob::order::{Order, OrderId};
use crate::types::{Side, Subticks};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Key ordering encodes side priority so that `first_key_value` is always
/// the best maker on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelKey {
    side: Side,
    subticks: u64,
    seq: u64,
}

impl Ord for LevelKey {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.side, other.side, "level keys never cross sides");
        let by_price = match self.side {
            Side::Buy => other.subticks.cmp(&self.subticks),
            Side::Sell => self.subticks.cmp(&other.subticks),
        };
        by_price.then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for LevelKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order: Order,
    pub seq: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Book {
    bids: BTreeMap<LevelKey, RestingOrder>,
    asks: BTreeMap<LevelKey, RestingOrder>,
    index: HashMap<OrderId, LevelKey>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    fn side_map(&self, side: Side) -> &BTreeMap<LevelKey, RestingOrder> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<LevelKey, RestingOrder> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn insert(&mut self, order: Order, seq: u64) {
        let key = LevelKey {
            side: order.side,
            subticks: order.subticks.value(),
            seq,
        };
        self.index.insert(order.id.clone(), key);
        self.side_map_mut(order.side)
            .insert(key, RestingOrder { order, seq });
    }

    pub fn remove(&mut self, order_id: &OrderId) -> Option<RestingOrder> {
        let key = self.index.remove(order_id)?;
        self.side_map_mut(key.side).remove(&key)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&RestingOrder> {
        let key = self.index.get(order_id)?;
        self.side_map(key.side).get(key)
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    /// Highest-priority resting order on `side`.
    pub fn best(&self, side: Side) -> Option<&RestingOrder> {
        self.side_map(side).first_key_value().map(|(_, v)| v)
    }

    pub fn best_subticks(&self, side: Side) -> Option<Subticks> {
        self.best(side).map(|r| r.order.subticks)
    }

    /// All resting orders on a side in priority order.
    pub fn orders(&self, side: Side) -> impl Iterator<Item = &RestingOrder> {
        self.side_map(side).values()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// A taker at `taker_subticks` crosses a maker at `maker_subticks` when the
/// taker's price is at least as aggressive.
pub fn crosses(taker_side: Side, taker_subticks: Subticks, maker_subticks: Subticks) -> bool {
    match taker_side {
        Side::Buy => taker_subticks >= maker_subticks,
        Side::Sell => taker_subticks <= maker_subticks,
    }
}
