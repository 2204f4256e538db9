//! In-memory resting-order ownership.
//!
//! The memclob exclusively owns every resting order. Handlers run inside an
//! undo scope: if the surrounding store transaction reverts, the book ops
//! recorded here replay in reverse so book and store never diverge.

use crate::clob::book::{Book, RestingOrder};
use crate::clob::order::{Order, OrderId};
use crate::types::{ClobPairId, Side};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone)]
enum BookOp {
    Inserted(OrderId),
    Removed(RestingOrder),
}

#[derive(Debug, Default)]
pub struct Memclob {
    books: BTreeMap<ClobPairId, Book>,
    next_seq: u64,
    undo_log: Vec<BookOp>,
    in_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemclobError {
    #[error("no book for clob pair {0:?}")]
    UnknownBook(ClobPairId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} already rests on the book")]
    DuplicateOrder(OrderId),
}

impl Memclob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_book(&mut self, clob_pair_id: ClobPairId) {
        self.books.entry(clob_pair_id).or_insert_with(Book::new);
    }

    pub fn has_book(&self, clob_pair_id: ClobPairId) -> bool {
        self.books.contains_key(&clob_pair_id)
    }

    fn book(&self, clob_pair_id: ClobPairId) -> Result<&Book, MemclobError> {
        self.books
            .get(&clob_pair_id)
            .ok_or(MemclobError::UnknownBook(clob_pair_id))
    }

    fn book_mut(&mut self, clob_pair_id: ClobPairId) -> Result<&mut Book, MemclobError> {
        self.books
            .get_mut(&clob_pair_id)
            .ok_or(MemclobError::UnknownBook(clob_pair_id))
    }

    /// Rests an order. Arrival priority is the next monotonic sequence number.
    pub fn insert_order(&mut self, order: Order) -> Result<(), MemclobError> {
        if self.get_order(&order.id).is_some() {
            return Err(MemclobError::DuplicateOrder(order.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = order.id.clone();
        self.book_mut(order.id.clob_pair_id)?.insert(order, seq);
        if self.in_scope {
            self.undo_log.push(BookOp::Inserted(id));
        }
        Ok(())
    }

    pub fn remove_order(&mut self, order_id: &OrderId) -> Option<RestingOrder> {
        let removed = self
            .books
            .get_mut(&order_id.clob_pair_id)
            .and_then(|book| book.remove(order_id));
        if let Some(resting) = &removed {
            if self.in_scope {
                self.undo_log.push(BookOp::Removed(resting.clone()));
            }
        }
        removed
    }

    pub fn get_order(&self, order_id: &OrderId) -> Option<&RestingOrder> {
        self.books
            .get(&order_id.clob_pair_id)
            .and_then(|book| book.get(order_id))
    }

    /// Best maker opposing a taker on `taker_side`.
    pub fn best_opposing(
        &self,
        clob_pair_id: ClobPairId,
        taker_side: Side,
    ) -> Result<Option<&RestingOrder>, MemclobError> {
        Ok(self.book(clob_pair_id)?.best(taker_side.opposite()))
    }

    pub fn orders(
        &self,
        clob_pair_id: ClobPairId,
        side: Side,
    ) -> Result<impl Iterator<Item = &RestingOrder>, MemclobError> {
        Ok(self.book(clob_pair_id)?.orders(side))
    }

    pub fn resting_order_count(&self) -> usize {
        self.books.values().map(Book::len).sum()
    }

    /// Short-term orders whose good-til-block has passed, in deterministic
    /// (pair id, book priority) order.
    pub fn expired_short_term_orders(&self, height: u32) -> Vec<OrderId> {
        let mut expired = Vec::new();
        for book in self.books.values() {
            for side in [Side::Buy, Side::Sell] {
                for resting in book.orders(side) {
                    if let Some(good_til_block) = resting.order.good_til_block() {
                        if good_til_block < height {
                            expired.push(resting.order.id.clone());
                        }
                    }
                }
            }
        }
        expired
    }

    // 5.1: undo scopes. one handler at a time; nesting is a bug.

    pub fn begin_scope(&mut self) {
        assert!(!self.in_scope, "memclob undo scope already open");
        self.in_scope = true;
        self.undo_log.clear();
    }

    pub fn commit_scope(&mut self) {
        assert!(self.in_scope, "no memclob undo scope to commit");
        self.in_scope = false;
        self.undo_log.clear();
    }

    /// Replays the handler's book ops in reverse, restoring original
    /// arrival priority for anything that was removed.
    pub fn revert_scope(&mut self) {
        assert!(self.in_scope, "no memclob undo scope to revert");
        self.in_scope = false;
        let ops: Vec<BookOp> = self.undo_log.drain(..).collect();
        for op in ops.into_iter().rev() {
            match op {
                BookOp::Inserted(order_id) => {
                    if let Some(book) = self.books.get_mut(&order_id.clob_pair_id) {
                        book.remove(&order_id);
                    }
                }
                BookOp::Removed(resting) => {
                    if let Some(book) = self.books.get_mut(&resting.order.id.clob_pair_id) {
                        book.insert(resting.order, resting.seq);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::order::{GoodTil, OrderFlags, TimeInForce};
    use crate::types::{BaseQuantums, SubaccountId, Subticks};

    fn order(client_id: u32, side: Side, subticks: u64, good_til_block: u32) -> Order {
        Order {
            id: OrderId {
                subaccount_id: SubaccountId::new("Alice", 0),
                client_id,
                clob_pair_id: ClobPairId(0),
                flags: OrderFlags::ShortTerm,
            },
            side,
            quantums: BaseQuantums(100),
            subticks: Subticks(subticks),
            time_in_force: TimeInForce::GoodTilTime,
            good_til: GoodTil::Block(good_til_block),
            reduce_only: false,
        }
    }

    fn memclob() -> Memclob {
        let mut memclob = Memclob::new();
        memclob.create_book(ClobPairId(0));
        memclob
    }

    #[test]
    fn insert_get_remove() {
        let mut mc = memclob();
        let o = order(1, Side::Buy, 100, 10);
        mc.insert_order(o.clone()).unwrap();

        assert!(mc.get_order(&o.id).is_some());
        assert!(matches!(
            mc.insert_order(o.clone()),
            Err(MemclobError::DuplicateOrder(_))
        ));

        mc.remove_order(&o.id).unwrap();
        assert!(mc.get_order(&o.id).is_none());
    }

    #[test]
    fn best_opposing_side() {
        let mut mc = memclob();
        mc.insert_order(order(1, Side::Sell, 105, 10)).unwrap();
        mc.insert_order(order(2, Side::Sell, 103, 10)).unwrap();

        let best = mc.best_opposing(ClobPairId(0), Side::Buy).unwrap().unwrap();
        assert_eq!(best.order.id.client_id, 2);

        assert!(mc.best_opposing(ClobPairId(0), Side::Sell).unwrap().is_none());
        assert!(mc.best_opposing(ClobPairId(9), Side::Buy).is_err());
    }

    #[test]
    fn expired_orders_by_height() {
        let mut mc = memclob();
        mc.insert_order(order(1, Side::Buy, 100, 5)).unwrap();
        mc.insert_order(order(2, Side::Buy, 100, 20)).unwrap();

        // orders stay valid through their good-til-block
        assert!(mc.expired_short_term_orders(5).is_empty());
        let expired = mc.expired_short_term_orders(6);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].client_id, 1);
    }

    #[test]
    fn revert_scope_restores_book_and_priority() {
        let mut mc = memclob();
        let kept = order(1, Side::Buy, 100, 10);
        mc.insert_order(kept.clone()).unwrap();

        mc.begin_scope();
        let added = order(2, Side::Buy, 101, 10);
        mc.insert_order(added.clone()).unwrap();
        mc.remove_order(&kept.id).unwrap();
        mc.revert_scope();

        assert!(mc.get_order(&added.id).is_none());
        let restored = mc.get_order(&kept.id).unwrap();
        assert_eq!(restored.seq, 0);
    }

    #[test]
    fn commit_scope_keeps_changes() {
        let mut mc = memclob();
        mc.begin_scope();
        mc.insert_order(order(1, Side::Buy, 100, 10)).unwrap();
        mc.commit_scope();
        assert_eq!(mc.resting_order_count(), 1);
    }
}
