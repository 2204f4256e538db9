//! Wire-message shapes.
//!
//! Transactions arrive already decoded; these structs mirror the proto
//! messages field for field so the decoding layer stays a straight mapping.

use crate::clob::{GoodTil, Order, OrderId};
use crate::types::{BaseQuantums, ClobPairId, MarketId, PerpetualId, SubaccountId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgPlaceOrder {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCancelOrder {
    pub order_id: OrderId,
    pub good_til: GoodTil,
}

/// One maker fill inside a proposed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerFill {
    pub maker_order_id: OrderId,
    pub fill_amount: BaseQuantums,
}

/// A proposed match between a taker order and a sequence of maker fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOrders {
    pub taker_order_id: OrderId,
    pub fills: Vec<MakerFill>,
}

/// A proposed liquidation match. The liquidation order itself is synthesized
/// by the engine, so the proposal carries its parameters rather than an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPerpetualLiquidation {
    pub liquidated: SubaccountId,
    pub clob_pair_id: ClobPairId,
    pub perpetual_id: PerpetualId,
    pub is_buy: bool,
    pub total_size: BaseQuantums,
    pub fills: Vec<MakerFill>,
}

/// The proposer's ordered queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    PlaceOrder(MsgPlaceOrder),
    MatchOrders(MatchOrders),
    MatchPerpetualLiquidation(MatchPerpetualLiquidation),
    CancelOrder(MsgCancelOrder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgProposedOperations {
    pub operations: Vec<Operation>,
}

// price-feed gRPC surface

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange_feed_id: u32,
    pub price: u64,
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPriceUpdate {
    pub market_id: MarketId,
    pub exchange_prices: Vec<ExchangePrice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMarketPricesRequest {
    pub market_price_updates: Vec<MarketPriceUpdate>,
}
