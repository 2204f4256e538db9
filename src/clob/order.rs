//! Order types for the memclob.
//!
//! Standing orders come in over the wire; liquidation orders are synthesized
//! by the liquidation engine, never rest, and are never persisted. The
//! matching pipeline sees both through the `MatchableOrder` sum.

use crate::types::{BaseQuantums, ClobPairId, PerpetualId, Side, SubaccountId, Subticks};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stateful orders persist until their good-til-time; short-term orders live
/// in the memclob only and expire by block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderFlags {
    ShortTerm,
    Stateful,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    pub subaccount_id: SubaccountId,
    pub client_id: u32,
    pub clob_pair_id: ClobPairId,
    pub flags: OrderFlags,
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.subaccount_id, self.client_id, self.clob_pair_id.0
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoodTil {
    /// Short-term expiry, exclusive: the order is gone once this height passes.
    Block(u32),
    /// Stateful expiry as unix seconds.
    Time(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Rest until filled or expired.
    GoodTilTime,
    /// Fill what crosses immediately, never rest.
    ImmediateOrCancel,
    /// Fill the entire size immediately or nothing.
    FillOrKill,
    /// Rest only; reject if any part would cross.
    PostOnly,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::GoodTilTime
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub quantums: BaseQuantums,
    pub subticks: Subticks,
    pub time_in_force: TimeInForce,
    pub good_til: GoodTil,
    pub reduce_only: bool,
}

impl Order {
    pub fn is_stateful(&self) -> bool {
        self.id.flags == OrderFlags::Stateful
    }

    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    pub fn good_til_block(&self) -> Option<u32> {
        match self.good_til {
            GoodTil::Block(height) => Some(height),
            GoodTil::Time(_) => None,
        }
    }

    pub fn good_til_time(&self) -> Option<u64> {
        match self.good_til {
            GoodTil::Time(time) => Some(time),
            GoodTil::Block(_) => None,
        }
    }

    /// Flags and good-til variant must agree.
    pub fn flags_match_good_til(&self) -> bool {
        matches!(
            (self.id.flags, self.good_til),
            (OrderFlags::ShortTerm, GoodTil::Block(_)) | (OrderFlags::Stateful, GoodTil::Time(_))
        )
    }
}

/// Synthesized when a subaccount drops below maintenance margin. Never
/// quoted, never stored; at most one in flight per match pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOrder {
    pub liquidated: SubaccountId,
    pub perpetual_id: PerpetualId,
    pub clob_pair_id: ClobPairId,
    pub side: Side,
    pub quantums: BaseQuantums,
    pub subticks: Subticks,
}

/// Either a standing order or a synthesized liquidation order. A sum instead
/// of a trait object: the matching pipeline branches on liquidation-ness and
/// nothing else ever implements this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchableOrder {
    Order(Order),
    Liquidation(LiquidationOrder),
}

impl MatchableOrder {
    pub fn is_liquidation(&self) -> bool {
        matches!(self, MatchableOrder::Liquidation(_))
    }

    pub fn side(&self) -> Side {
        match self {
            MatchableOrder::Order(o) => o.side,
            MatchableOrder::Liquidation(l) => l.side,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side().is_buy()
    }

    pub fn quantums(&self) -> BaseQuantums {
        match self {
            MatchableOrder::Order(o) => o.quantums,
            MatchableOrder::Liquidation(l) => l.quantums,
        }
    }

    pub fn subticks(&self) -> Subticks {
        match self {
            MatchableOrder::Order(o) => o.subticks,
            MatchableOrder::Liquidation(l) => l.subticks,
        }
    }

    pub fn subaccount_id(&self) -> &SubaccountId {
        match self {
            MatchableOrder::Order(o) => &o.id.subaccount_id,
            MatchableOrder::Liquidation(l) => &l.liquidated,
        }
    }

    pub fn clob_pair_id(&self) -> ClobPairId {
        match self {
            MatchableOrder::Order(o) => o.id.clob_pair_id,
            MatchableOrder::Liquidation(l) => l.clob_pair_id,
        }
    }

    /// The standing order, when there is one. Panics for liquidations;
    /// callers gate on `is_liquidation` first.
    pub fn must_order(&self) -> &Order {
        match self {
            MatchableOrder::Order(o) => o,
            MatchableOrder::Liquidation(_) => {
                panic!("must_order called on a liquidation order")
            }
        }
    }
}
