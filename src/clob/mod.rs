//! Central-limit order book: pair configuration, order types, the
//! price-time-priority book, and the in-memory resting-order owner.

pub mod book;
pub mod memclob;
pub mod order;
pub mod pair;

pub use book::{crosses, Book, RestingOrder};
pub use memclob::{Memclob, MemclobError};
pub use order::{
    GoodTil, LiquidationOrder, MatchableOrder, Order, OrderFlags, OrderId, TimeInForce,
};
pub use pair::{ClobPair, ClobPairConfigError, ClobPairStatus, OrderValidationError};
